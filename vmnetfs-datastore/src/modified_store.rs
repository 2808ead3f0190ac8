//! Sparse overlay for dirty chunks.
//!
//! Backed by a single anonymous file (`tempfile::tempfile`, which opens and
//! immediately unlinks the inode, the same "private to this process" trick
//! the design calls for) addressed by `chunk_index * chunk_size + offset`.
//! Relies on the filesystem's native sparse-file support for holes: any byte
//! never written reads back as zero without this module tracking it.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::Mutex;

use vmnetfs_types::CacheError;

pub struct ModifiedStore {
    file: Mutex<File>,
    chunk_size: u64,
}

impl ModifiedStore {
    pub fn new(chunk_size: u64) -> Result<Self, CacheError> {
        let file = tempfile::tempfile()?;
        Ok(ModifiedStore {
            file: Mutex::new(file),
            chunk_size,
        })
    }

    fn offset_for(&self, chunk: u64, in_chunk_offset: u64) -> u64 {
        chunk * self.chunk_size + in_chunk_offset
    }

    /// Reads `len` bytes starting at `in_chunk_offset` within `chunk`. Bytes
    /// past the overlay file's current extent (never written, or beyond a
    /// shrink) come back zeroed.
    pub fn read_chunk(
        &self,
        chunk: u64,
        in_chunk_offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, CacheError> {
        let mut buf = vec![0u8; len];
        let offset = self.offset_for(chunk, in_chunk_offset);
        let file = self.file.lock().unwrap();

        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read_at(&mut buf[filled..], offset + filled as u64)?;
            if n == 0 {
                // short read at EOF: remainder stays zero-initialized.
                break;
            }
            filled += n;
        }
        Ok(buf)
    }

    pub fn write_chunk(
        &self,
        chunk: u64,
        in_chunk_offset: u64,
        data: &[u8],
    ) -> Result<(), CacheError> {
        let offset = self.offset_for(chunk, in_chunk_offset);
        let file = self.file.lock().unwrap();
        file.write_all_at(data, offset)?;
        Ok(())
    }

    /// Zero-fills the tail of `chunk` from `keep_len` to `chunk_size`, used
    /// when a truncate shrinks into the middle of a chunk that is still
    /// (partially) retained. Re-extending past `keep_len` later reads back
    /// as zero, matching the "zero-fill on re-extension" requirement.
    pub fn zero_fill_tail(&self, chunk: u64, keep_len: u64) -> Result<(), CacheError> {
        if keep_len >= self.chunk_size {
            return Ok(());
        }
        let start = self.offset_for(chunk, keep_len);
        let length = (self.chunk_size - keep_len) as usize;
        let zeros = vec![0u8; length];
        let file = self.file.lock().unwrap();
        file.write_all_at(&zeros, start)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let store = ModifiedStore::new(4096).unwrap();
        store.write_chunk(2, 100, b"abcd").unwrap();
        assert_eq!(store.read_chunk(2, 100, 4).unwrap(), b"abcd");
    }

    #[test]
    fn never_written_region_reads_as_zero() {
        let store = ModifiedStore::new(4096).unwrap();
        assert_eq!(store.read_chunk(9, 0, 16).unwrap(), vec![0u8; 16]);
    }

    #[test]
    fn hole_before_written_tail_reads_as_zero() {
        let store = ModifiedStore::new(4096).unwrap();
        store.write_chunk(0, 4000, b"z").unwrap();
        let data = store.read_chunk(0, 0, 4001).unwrap();
        assert_eq!(&data[..4000], &vec![0u8; 4000][..]);
        assert_eq!(&data[4000..], b"z");
    }

    #[test]
    fn zero_fill_tail_clears_and_reextension_stays_zero() {
        let store = ModifiedStore::new(16).unwrap();
        store.write_chunk(0, 0, b"0123456789abcdef").unwrap();
        store.zero_fill_tail(0, 8).unwrap();

        let data = store.read_chunk(0, 0, 16).unwrap();
        assert_eq!(&data[..8], b"01234567");
        assert_eq!(&data[8..], &[0u8; 8]);
    }
}
