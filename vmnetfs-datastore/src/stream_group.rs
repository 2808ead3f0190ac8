//! Fan-out of an append-only byte log to any number of late-joining
//! subscribers.
//!
//! Each subscriber gets its own read cursor (a [`Stream`]); a stream group
//! may carry a "populate" callback that seeds a brand new subscriber with
//! historical state (e.g. every bit already set in a [`crate::bitmap::Bitmap`])
//! before any live write reaches it. Passing populate as a plain closure
//! captured at construction time — rather than having the stream group hold
//! a back-reference to its owner — avoids the owner/stream-group reference
//! cycle the design explicitly calls out.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum StreamReadError {
    #[error("would block")]
    WouldBlock,
}

struct StreamState {
    buffer: Mutex<VecDeque<u8>>,
    cond: Condvar,
    closed: AtomicBool,
}

/// A single subscriber's read cursor into a [`StreamGroup`].
pub struct Stream {
    state: Arc<StreamState>,
}

impl Stream {
    fn new() -> Self {
        Stream {
            state: Arc::new(StreamState {
                buffer: Mutex::new(VecDeque::new()),
                cond: Condvar::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn push(&self, data: &[u8]) {
        let mut buf = self.state.buffer.lock().unwrap();
        buf.extend(data.iter().copied());
        self.state.cond.notify_all();
    }

    /// Convenience for populate callbacks and trace emitters.
    pub fn write(&self, text: &str) {
        self.push(text.as_bytes());
    }

    fn mark_closed(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
        self.state.cond.notify_all();
    }

    /// Returns up to `count` bytes. In blocking mode, waits until at least
    /// one byte is available or the group closes (returning `Ok(vec![])` at
    /// EOF). In non-blocking mode, returns `Err(WouldBlock)` immediately when
    /// empty and the group is still open.
    pub fn read(&self, count: usize, blocking: bool) -> Result<Vec<u8>, StreamReadError> {
        let mut buf = self.state.buffer.lock().unwrap();
        loop {
            if !buf.is_empty() {
                let n = count.min(buf.len());
                return Ok(buf.drain(..n).collect());
            }
            if self.state.closed.load(Ordering::SeqCst) {
                return Ok(Vec::new());
            }
            if !blocking {
                return Err(StreamReadError::WouldBlock);
            }
            buf = self.state.cond.wait(buf).unwrap();
        }
    }
}

type Populate = Box<dyn Fn(&Stream) + Send + Sync>;

struct Inner {
    streams: Vec<Arc<Stream>>,
    closed: bool,
    populate: Option<Populate>,
}

/// Owns a set of [`Stream`]s and broadcasts writes to all of them.
pub struct StreamGroup {
    inner: Mutex<Inner>,
}

impl StreamGroup {
    pub fn new() -> Self {
        StreamGroup {
            inner: Mutex::new(Inner {
                streams: Vec::new(),
                closed: false,
                populate: None,
            }),
        }
    }

    /// Installs the one-shot seeding callback invoked synchronously inside
    /// `new_stream` for every subsequent subscriber.
    pub fn set_populate(&self, populate: impl Fn(&Stream) + Send + Sync + 'static) {
        self.inner.lock().unwrap().populate = Some(Box::new(populate));
    }

    pub fn new_stream(&self) -> Arc<Stream> {
        let stream = Arc::new(Stream::new());
        let mut inner = self.inner.lock().unwrap();
        if let Some(populate) = &inner.populate {
            populate(&stream);
        }
        if inner.closed {
            stream.mark_closed();
        }
        inner.streams.push(Arc::clone(&stream));
        stream
    }

    pub fn write(&self, text: &str) {
        let inner = self.inner.lock().unwrap();
        if inner.closed {
            return;
        }
        for stream in &inner.streams {
            stream.push(text.as_bytes());
        }
    }

    /// Unblocks every current and future subscriber with EOF; no further
    /// writes are delivered.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        for stream in &inner.streams {
            stream.mark_closed();
        }
    }
}

impl Default for StreamGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_fans_out_to_all_subscribers() {
        let group = StreamGroup::new();
        let a = group.new_stream();
        let b = group.new_stream();
        group.write("hello\n");
        assert_eq!(a.read(64, false).unwrap(), b"hello\n");
        assert_eq!(b.read(64, false).unwrap(), b"hello\n");
    }

    #[test]
    fn non_blocking_read_on_empty_open_group_would_block() {
        let group = StreamGroup::new();
        let s = group.new_stream();
        assert!(matches!(s.read(64, false), Err(StreamReadError::WouldBlock)));
    }

    #[test]
    fn close_unblocks_with_eof() {
        let group = StreamGroup::new();
        let s = group.new_stream();
        group.close();
        assert_eq!(s.read(64, true).unwrap(), Vec::<u8>::new());
        assert_eq!(s.read(64, false).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn late_subscriber_closed_group_is_immediately_at_eof() {
        let group = StreamGroup::new();
        group.close();
        let s = group.new_stream();
        assert_eq!(s.read(64, false).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn populate_seeds_new_subscribers() {
        let group = StreamGroup::new();
        group.set_populate(|s| s.write("seed\n"));
        let s = group.new_stream();
        assert_eq!(s.read(64, false).unwrap(), b"seed\n");
    }
}
