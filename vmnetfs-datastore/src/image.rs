//! Per-image orchestration (§4.8): constrain → lock → (fetch ∨ overlay-read)
//! → account → stream-trace. This is the module that ties every leaf
//! component (bitmaps, counters, stream groups, the chunk lock table, the
//! two stores, and the transport) into the read/write/truncate surface the
//! namespace's `image` file calls into.

use std::path::Path;
use std::sync::{Arc, Mutex};

use vmnetfs_client::transport::{FetchRequest, Transport};
use vmnetfs_types::{CacheError, Credentials, ImageConfig, ImageError};

use crate::bitmap::Bitmap;
use crate::chunk_lock::ChunkLockTable;
use crate::event_log::EventLog;
use crate::modified_store::ModifiedStore;
use crate::pristine_store::PristineStore;
use crate::stat::StatCounter;
use crate::stream_group::{Stream, StreamGroup};

/// An always-false predicate for callers (truncate, init) that the VFS host
/// never cancels.
fn never_interrupted() -> bool {
    false
}

/// One logical device (`disk` or `memory`): the data model of §3.
pub struct Image {
    pub name: String,
    origin_url: String,
    credentials: Option<Credentials>,
    cookies: Vec<String>,
    fetch_offset: u64,
    segment_size: Option<u64>,
    chunk_size: u64,
    initial_size: u64,
    etag: Option<String>,
    last_modified: Option<i64>,

    current_size: Mutex<u64>,
    closed: std::sync::atomic::AtomicBool,

    pub bytes_read: Arc<StatCounter>,
    pub bytes_written: Arc<StatCounter>,
    pub chunk_fetches: Arc<StatCounter>,
    pub chunk_dirties: Arc<StatCounter>,
    pub io_errors: Arc<StatCounter>,

    pub present_map: Arc<Bitmap>,
    pub modified_map: Arc<Bitmap>,
    pub accessed_map: Arc<Bitmap>,

    io_stream: StreamGroup,

    chunk_locks: ChunkLockTable,
    pristine: PristineStore,
    modified: ModifiedStore,
    transport: Arc<Transport>,
    event_log: Arc<EventLog>,
}

/// Everything needed to process one chunk-sized read/write sub-operation,
/// as produced by [`Cursor`].
struct Step {
    chunk: u64,
    in_chunk_offset: u64,
    in_chunk_length: usize,
    buf_offset: usize,
}

/// Iterates `(chunk, in_chunk_offset, in_chunk_length, buf_offset)` tuples
/// for a `(start, count)` request (§4.8 "Cursor"). Re-reads the image's
/// current size on every step, since a concurrent truncate may shrink the
/// logical end of the image between sub-operations.
struct Cursor<'a> {
    image: &'a Image,
    start: u64,
    count: usize,
    buf_offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(image: &'a Image, start: u64, count: usize) -> Self {
        Cursor {
            image,
            start,
            count,
            buf_offset: 0,
        }
    }

    fn next_step(&mut self) -> Option<Step> {
        if self.buf_offset >= self.count {
            return None;
        }
        let global_offset = self.start + self.buf_offset as u64;
        let size = self.image.size();
        if global_offset >= size {
            return None;
        }

        let chunk_size = self.image.chunk_size;
        let chunk = global_offset / chunk_size;
        let in_chunk_offset = global_offset % chunk_size;
        let remaining_in_chunk = chunk_size - in_chunk_offset;
        let remaining_in_image = size - global_offset;
        let remaining_requested = (self.count - self.buf_offset) as u64;
        let in_chunk_length = remaining_in_chunk
            .min(remaining_in_image)
            .min(remaining_requested) as usize;

        Some(Step {
            chunk,
            in_chunk_offset,
            in_chunk_length,
            buf_offset: self.buf_offset,
        })
    }

    /// Advances the cursor by the number of bytes the last step actually
    /// transferred, which may be less than `in_chunk_length` asked for.
    fn advance(&mut self, actual: usize) {
        self.buf_offset += actual;
    }
}

impl Image {
    /// Constructs and initializes an image from its config record: scans
    /// the pristine cache directory to rebuild `present_map`, and opens the
    /// (process-private) modified store. Cache corruption here is a fatal
    /// init error (§7 "Cache").
    pub fn init(
        config: &ImageConfig,
        transport: Arc<Transport>,
        event_log: Arc<EventLog>,
    ) -> Result<Arc<Self>, CacheError> {
        let chunk_size = config.cache.chunk_size;
        let initial_size = config.size;
        let chunk_count = initial_size.div_ceil(chunk_size).max(1);

        let (pristine, present) = PristineStore::open(Path::new(&config.cache.path), chunk_count)?;
        let modified = ModifiedStore::new(chunk_size)?;

        let present_map = Bitmap::new();
        for chunk in &present {
            present_map.set(*chunk);
        }

        let image = Arc::new(Image {
            name: config.name.clone(),
            origin_url: config.origin.url.clone(),
            credentials: config.origin.credentials.clone(),
            cookies: config.origin.cookies.cookie.clone(),
            fetch_offset: config.origin.offset.unwrap_or(0),
            segment_size: config.origin.segment_size.filter(|s| *s != 0),
            chunk_size,
            initial_size,
            etag: config
                .origin
                .validators
                .as_ref()
                .and_then(|v| v.etag.clone()),
            last_modified: config
                .origin
                .validators
                .as_ref()
                .and_then(|v| v.last_modified),
            current_size: Mutex::new(initial_size),
            closed: std::sync::atomic::AtomicBool::new(false),
            bytes_read: StatCounter::new(),
            bytes_written: StatCounter::new(),
            chunk_fetches: StatCounter::new(),
            chunk_dirties: StatCounter::new(),
            io_errors: StatCounter::new(),
            present_map,
            modified_map: Bitmap::new(),
            accessed_map: Bitmap::new(),
            io_stream: StreamGroup::new(),
            chunk_locks: ChunkLockTable::new(),
            pristine,
            modified,
            transport,
            event_log: Arc::clone(&event_log),
        });

        event_log.log(&format!(
            "image '{}' initialized: {} of {} chunks present, size={}",
            image.name,
            present.len(),
            chunk_count,
            initial_size
        ));

        Ok(image)
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn size(&self) -> u64 {
        *self.current_size.lock().unwrap()
    }

    pub fn chunk_count(&self) -> u64 {
        self.size().div_ceil(self.chunk_size).max(1)
    }

    pub fn subscribe_io(&self) -> Arc<Stream> {
        self.io_stream.new_stream()
    }

    /// Unblocks every stream subscriber with EOF; called by the lifecycle
    /// driver when the mount is torn down.
    pub fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        self.event_log.log(&format!("image '{}' closed", self.name));
        self.io_stream.close();
        self.present_map.close();
        self.modified_map.close();
        self.accessed_map.close();
    }

    /// Reads up to `count` bytes starting at `start` into `buf`. Returns the
    /// number of bytes actually transferred; reaching the logical end of
    /// the image is reported as a short (possibly zero-length) read, never
    /// as an error (§4.8 "Failure semantics", EOF).
    pub fn read(
        &self,
        buf: &mut [u8],
        start: u64,
        count: usize,
        is_interrupted: &dyn Fn() -> bool,
    ) -> Result<usize, ImageError> {
        self.io_stream.write(&format!("read {}+{}\n", start, count));

        let mut cursor = Cursor::new(self, start, count);
        let mut total = 0usize;
        while let Some(step) = cursor.next_step() {
            match self.read_chunk(step.chunk, step.in_chunk_offset, step.in_chunk_length, is_interrupted) {
                Ok(data) => {
                    buf[step.buf_offset..step.buf_offset + data.len()].copy_from_slice(&data);
                    let actual = data.len();
                    total += actual;
                    cursor.advance(actual);
                    if actual < step.in_chunk_length {
                        // partial chunk transfer: stop, matching "advance by
                        // the actual bytes processed" ending iteration early.
                        break;
                    }
                }
                Err(err) => {
                    if total == 0 {
                        return Err(err);
                    }
                    // Partial progress already made: report it, swallowing
                    // the error for this call the way EOF/Interrupted/I/O all
                    // do once at least one byte has transferred.
                    return Ok(total);
                }
            }
        }
        Ok(total)
    }

    /// Writes `count` bytes from `buf` at `start`. Returns bytes actually
    /// written.
    pub fn write(
        &self,
        buf: &[u8],
        start: u64,
        count: usize,
        is_interrupted: &dyn Fn() -> bool,
    ) -> Result<usize, ImageError> {
        self.io_stream.write(&format!("write {}+{}\n", start, count));

        let mut cursor = Cursor::new(self, start, count);
        let mut total = 0usize;
        while let Some(step) = cursor.next_step() {
            let slice = &buf[step.buf_offset..step.buf_offset + step.in_chunk_length];
            match self.write_chunk(step.chunk, step.in_chunk_offset, slice, is_interrupted) {
                Ok(actual) => {
                    total += actual;
                    cursor.advance(actual);
                    if actual < step.in_chunk_length {
                        break;
                    }
                }
                Err(err) => {
                    if total == 0 {
                        return Err(err);
                    }
                    return Ok(total);
                }
            }
        }
        Ok(total)
    }

    /// Changes the logical size of the image. Shrinking zero-fills the
    /// tail of any chunk that becomes partially or fully out of range,
    /// waiting on (rather than skipping) any chunk whose lock is currently
    /// held, per invariant 5. Growing past `initial_size` extends into
    /// modified-store space only: there is no pristine backing there, so
    /// reads return zeros until written.
    pub fn truncate(&self, new_size: u64) -> Result<(), ImageError> {
        let old_size = self.size();
        if new_size < old_size {
            let chunk_size = self.chunk_size;
            let first_affected = new_size / chunk_size;
            let last_affected = (old_size - 1) / chunk_size;
            for chunk in first_affected..=last_affected {
                let _guard = self.chunk_locks.acquire(chunk, &never_interrupted)?;
                let chunk_start = chunk * chunk_size;
                let keep_len = new_size.saturating_sub(chunk_start).min(chunk_size);
                self.modified.zero_fill_tail(chunk, keep_len)?;
            }
        }
        *self.current_size.lock().unwrap() = new_size;
        Ok(())
    }

    /// Per-chunk read pipeline (§4.8). `requested_len` has already been
    /// clamped against the size the cursor observed; this function
    /// re-clamps against the size captured at lock-acquisition time, since
    /// the two may legitimately differ under a racing truncate.
    ///
    /// A chunk may extend past `initial_size` when the image has been grown
    /// by `truncate` beyond its starting size: that tail has no origin
    /// backing at all, so it is zero-filled here rather than fetched, even
    /// for a chunk whose leading portion is already pristine-cached (§4.8
    /// "Growing past initial_size").
    fn read_chunk(
        &self,
        chunk: u64,
        in_chunk_offset: u64,
        requested_len: usize,
        is_interrupted: &dyn Fn() -> bool,
    ) -> Result<Vec<u8>, ImageError> {
        let _guard = self.chunk_locks.acquire(chunk, is_interrupted)?;

        let size = self.size();
        let global_start = chunk * self.chunk_size + in_chunk_offset;
        if global_start >= size {
            return Ok(Vec::new());
        }
        let len = (requested_len as u64).min(size - global_start) as usize;
        if len == 0 {
            return Ok(Vec::new());
        }

        self.accessed_map.set(chunk);

        if self.modified_map.test(chunk) {
            let data = self.track_store_err(self.modified.read_chunk(chunk, in_chunk_offset, len))?;
            self.bytes_read.add(data.len() as u64);
            return Ok(data);
        }

        if global_start >= self.initial_size {
            // Entirely in grown, never-fetchable space: zero, no fetch.
            let data = vec![0u8; len];
            self.bytes_read.add(data.len() as u64);
            return Ok(data);
        }

        let origin_len = self.origin_chunk_len(chunk);
        let data = if self.present_map.test(chunk) {
            self.read_pristine_slice(chunk, in_chunk_offset, len)?
        } else {
            let full_chunk = match self.fetch_chunk(chunk, origin_len, is_interrupted) {
                Ok(data) => data,
                Err(err) => {
                    if !err.is_interrupted() {
                        self.io_errors.add(1);
                        self.event_log.log(&format!(
                            "image '{}': fetch of chunk {} failed: {}",
                            self.name, chunk, err
                        ));
                    }
                    return Err(err);
                }
            };

            self.track_store_err(self.pristine.write_chunk(chunk, &full_chunk))?;
            self.present_map.set(chunk);
            self.chunk_fetches.add(1);
            Self::pad_slice(&full_chunk, in_chunk_offset as usize, len)
        };
        self.bytes_read.add(data.len() as u64);
        Ok(data)
    }

    /// Per-chunk write pipeline (§4.8): materializes the whole chunk into
    /// the overlay on first write (which may itself fetch via the read
    /// pipeline), then overwrites the requested slice.
    fn write_chunk(
        &self,
        chunk: u64,
        in_chunk_offset: u64,
        data: &[u8],
        is_interrupted: &dyn Fn() -> bool,
    ) -> Result<usize, ImageError> {
        let _guard = self.chunk_locks.acquire(chunk, is_interrupted)?;

        let size = self.size();
        let global_start = chunk * self.chunk_size + in_chunk_offset;
        if global_start >= size {
            return Ok(0);
        }
        let len = (data.len() as u64).min(size - global_start) as usize;
        if len == 0 {
            return Ok(0);
        }

        self.accessed_map.set(chunk);

        if !self.modified_map.test(chunk) {
            let chunk_start = chunk * self.chunk_size;
            let existing = if chunk_start >= self.initial_size {
                // Whole chunk is in grown, never-fetchable space.
                Vec::new()
            } else if self.present_map.test(chunk) {
                self.track_store_err(self.pristine.read_chunk(chunk))?
            } else {
                let origin_len = self.origin_chunk_len(chunk);
                match self.fetch_chunk(chunk, origin_len, is_interrupted) {
                    Ok(full) => {
                        self.track_store_err(self.pristine.write_chunk(chunk, &full))?;
                        self.present_map.set(chunk);
                        self.chunk_fetches.add(1);
                        full
                    }
                    Err(err) => {
                        if !err.is_interrupted() {
                            self.io_errors.add(1);
                            self.event_log.log(&format!(
                                "image '{}': fetch of chunk {} failed: {}",
                                self.name, chunk, err
                            ));
                        }
                        return Err(err);
                    }
                }
            };
            // Bytes past `existing`'s length stay zero via the modified
            // store's native sparse holes; no explicit padding needed.
            if !existing.is_empty() {
                self.track_store_err(self.modified.write_chunk(chunk, 0, &existing))?;
            }
            self.chunk_dirties.add(1);
            self.modified_map.set(chunk);
        }

        self.track_store_err(self.modified.write_chunk(chunk, in_chunk_offset, &data[..len]))?;
        self.bytes_written.add(len as u64);
        Ok(len)
    }

    /// Increments `io_errors` when a pristine/modified store call fails,
    /// per §7's I/O-Generic row ("modified-store write failed → increment
    /// `io_errors`"); passes the result through unchanged otherwise.
    fn track_store_err<T>(&self, result: Result<T, ImageError>) -> Result<T, ImageError> {
        if result.is_err() {
            self.io_errors.add(1);
        }
        result
    }

    /// Reads `len` bytes at `in_chunk_offset` from a pristine chunk,
    /// zero-padding any portion beyond the chunk's stored origin length
    /// (the grown, never-fetched tail of a chunk whose origin bytes don't
    /// fill it, per §4.8 "Growing past initial_size").
    fn read_pristine_slice(
        &self,
        chunk: u64,
        in_chunk_offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, ImageError> {
        let full = self.pristine.read_chunk(chunk)?;
        Ok(Self::pad_slice(&full, in_chunk_offset as usize, len))
    }

    /// Returns `len` bytes starting at `start` within `full`, zero-padding
    /// any portion of the requested range past `full`'s end.
    fn pad_slice(full: &[u8], start: usize, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        if start < full.len() {
            let avail = (full.len() - start).min(len);
            out[..avail].copy_from_slice(&full[start..start + avail]);
        }
        out
    }

    /// The number of bytes of `chunk` that are actually backed by the
    /// origin (i.e. within `[0, initial_size)`), which may be less than
    /// `chunk_size` for the last chunk of a non-chunk-aligned image, or
    /// zero for a chunk that lies entirely in grown space.
    fn origin_chunk_len(&self, chunk: u64) -> u64 {
        let chunk_start = chunk * self.chunk_size;
        if chunk_start >= self.initial_size {
            0
        } else {
            self.chunk_size.min(self.initial_size - chunk_start)
        }
    }

    /// Fetches a whole chunk from the origin, honoring segmentation: one
    /// logical byte range may translate into several per-segment ranges at
    /// `<url>.0, <url>.1, …` when `segment_size` is set.
    fn fetch_chunk(
        &self,
        chunk: u64,
        origin_len: u64,
        is_interrupted: &dyn Fn() -> bool,
    ) -> Result<Vec<u8>, ImageError> {
        let abs_start = chunk * self.chunk_size + self.fetch_offset;
        let mut out = Vec::with_capacity(origin_len as usize);

        for (url, range_start, range_len) in self.segment_ranges(abs_start, origin_len) {
            let request = FetchRequest {
                url: &url,
                range_start,
                range_len,
                credentials: self.credentials.as_ref(),
                cookies: &self.cookies,
                etag: self.etag.as_deref(),
                last_modified: self.last_modified,
                cancel: is_interrupted,
            };
            let data = self.transport.fetch(&request)?;
            out.extend_from_slice(&data);
        }

        Ok(out)
    }

    /// Splits `[start, start+len)` into `(url, offset_in_segment, length)`
    /// spans. With no `segment_size` configured, this is always a single
    /// span against the unmodified origin URL.
    fn segment_ranges(&self, start: u64, len: u64) -> Vec<(String, u64, u64)> {
        let Some(segment_size) = self.segment_size else {
            return vec![(self.origin_url.clone(), start, len)];
        };

        let mut spans = Vec::new();
        let mut remaining = len;
        let mut pos = start;
        while remaining > 0 {
            let segment_index = pos / segment_size;
            let offset_in_segment = pos % segment_size;
            let span_len = (segment_size - offset_in_segment).min(remaining);
            spans.push((
                format!("{}.{}", self.origin_url, segment_index),
                offset_in_segment,
                span_len,
            ));
            pos += span_len;
            remaining -= span_len;
        }
        spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmnetfs_types::{CacheConfig, OriginConfig};

    fn test_config(path: &std::path::Path, size: u64, chunk_size: u64) -> ImageConfig {
        ImageConfig {
            name: "disk".to_string(),
            origin: OriginConfig {
                url: "https://origin.example/disk.img".to_string(),
                credentials: None,
                offset: None,
                segment_size: None,
                cookies: Default::default(),
                validators: None,
            },
            size,
            cache: CacheConfig {
                path: path.display().to_string(),
                chunk_size,
            },
        }
    }

    /// Pre-populates a pristine cache directory with one chunk's bytes, so
    /// `Image::init`'s directory scan marks it present without a fetch —
    /// the origin URLs these tests use (`origin.example`, a reserved,
    /// never-resolving domain per RFC 2606) would otherwise make any real
    /// fetch attempt a network error.
    fn seed_pristine_chunk(cache_dir: &std::path::Path, chunk: u64, data: &[u8]) {
        let bucket = (chunk / 4096) * 4096;
        let dir = cache_dir.join(bucket.to_string());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(chunk.to_string()), data).unwrap();
    }

    #[test]
    fn init_with_no_cache_has_empty_present_map() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 1_048_576, 131_072);
        let transport = Arc::new(Transport::new().unwrap());
        let image = Image::init(&config, transport, EventLog::new()).unwrap();
        assert_eq!(image.size(), 1_048_576);
        assert!(!image.present_map.test(0));
    }

    #[test]
    fn init_and_close_record_events_on_the_shared_log() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 1_048_576, 131_072);
        let transport = Arc::new(Transport::new().unwrap());
        let event_log = EventLog::new();
        let stream = event_log.subscribe();

        let image = Image::init(&config, transport, Arc::clone(&event_log)).unwrap();
        let seen = String::from_utf8(stream.read(4096, false).unwrap()).unwrap();
        assert!(seen.contains("image 'disk' initialized"));

        image.close();
        let seen = String::from_utf8(stream.read(4096, false).unwrap()).unwrap();
        assert!(seen.contains("image 'disk' closed"));
    }

    #[test]
    fn segment_ranges_without_segmentation_is_single_span() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 1000, 100);
        let transport = Arc::new(Transport::new().unwrap());
        let image = Image::init(&config, transport, EventLog::new()).unwrap();
        let spans = image.segment_ranges(50, 40);
        assert_eq!(spans, vec![("https://origin.example/disk.img".to_string(), 50, 40)]);
    }

    #[test]
    fn segment_ranges_splits_across_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), 1000, 100);
        config.origin.segment_size = Some(100);
        let transport = Arc::new(Transport::new().unwrap());
        let image = Image::init(&config, transport, EventLog::new()).unwrap();

        let spans = image.segment_ranges(80, 50);
        assert_eq!(
            spans,
            vec![
                ("https://origin.example/disk.img.0".to_string(), 80, 20),
                ("https://origin.example/disk.img.1".to_string(), 0, 30),
            ]
        );
    }

    #[test]
    fn truncate_shrink_then_grow_zero_fills_reextension() {
        let dir = tempfile::tempdir().unwrap();
        seed_pristine_chunk(dir.path(), 0, &[0u8; 16]);
        let config = test_config(dir.path(), 16, 16);
        let transport = Arc::new(Transport::new().unwrap());
        let image = Image::init(&config, transport, EventLog::new()).unwrap();
        assert!(image.present_map.test(0));

        image
            .write(b"0123456789abcdef", 0, 16, &never_interrupted)
            .unwrap();

        image.truncate(8).unwrap();
        image.truncate(16).unwrap();

        let mut buf = vec![0u8; 16];
        image.read(&mut buf, 0, 16, &never_interrupted).unwrap();
        assert_eq!(&buf[..8], b"01234567");
        assert_eq!(&buf[8..], &[0u8; 8]);
    }

    #[test]
    fn idempotent_truncate_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 100, 16);
        let transport = Arc::new(Transport::new().unwrap());
        let image = Image::init(&config, transport, EventLog::new()).unwrap();

        image.truncate(50).unwrap();
        image.truncate(50).unwrap();
        assert_eq!(image.size(), 50);
    }

    #[test]
    fn growing_past_initial_size_reads_zero_without_fetching() {
        // initial_size isn't chunk-aligned: chunk 0 only has 10 origin
        // bytes, so growing to 32 leaves chunk 0's tail and all of chunk 1
        // entirely unbacked by the origin. No network mock is installed, so
        // a wrongful fetch attempt for the grown region would error out
        // instead of silently succeeding.
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 10, 16);
        let transport = Arc::new(Transport::new().unwrap());
        let image = Image::init(&config, transport, EventLog::new()).unwrap();

        image.truncate(32).unwrap();
        assert_eq!(image.size(), 32);

        // Chunk 1 (bytes 16-31) lies entirely beyond initial_size=10.
        let mut buf = vec![0xffu8; 16];
        let n = image.read(&mut buf, 16, 16, &never_interrupted).unwrap();
        assert_eq!(n, 16);
        assert_eq!(buf, vec![0u8; 16]);
        assert_eq!(image.chunk_fetches.value(), 0);
        assert!(!image.present_map.test(1));
    }

    #[test]
    fn read_straddling_origin_and_grown_region_in_same_chunk() {
        // Chunk 0's origin-backed prefix is 10 bytes; reading its tail
        // straddles that boundary and the grown, unbacked remainder up to
        // chunk_size=16.
        let dir = tempfile::tempdir().unwrap();
        seed_pristine_chunk(dir.path(), 0, b"0123456789");
        let config = test_config(dir.path(), 10, 16);
        let transport = Arc::new(Transport::new().unwrap());
        let image = Image::init(&config, transport, EventLog::new()).unwrap();

        image.truncate(16).unwrap();
        assert_eq!(image.size(), 16);

        let mut buf = vec![0xffu8; 11];
        let n = image.read(&mut buf, 5, 11, &never_interrupted).unwrap();
        assert_eq!(n, 11);
        assert_eq!(&buf[..5], b"56789");
        assert_eq!(&buf[5..], &[0u8; 6]);
        assert_eq!(image.chunk_fetches.value(), 0);
    }
}
