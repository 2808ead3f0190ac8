//! The process-global `/log` stream: a append-only record of notable engine
//! events, independent of the `log`/`env_logger`/`syslog` stack the driver
//! uses for its own operator-facing diagnostics.
//!
//! This is the one piece of genuinely global mutable state in the design.
//! Rather than a lazily-initialized static, construction is explicit:
//! [`EventLog::new`] returns a handle that the driver threads through every
//! image's construction, matching the "explicit `init()` returning a handle"
//! strategy. A bounded ring buffer retains the last 64 KiB of lines so a
//! subscriber that attaches after startup still sees recent history before
//! any live appends.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::stream_group::StreamGroup;

const RING_CAPACITY: usize = 64 * 1024;

struct Ring {
    buffer: VecDeque<u8>,
}

/// The engine-wide event log backing the `/log` file.
pub struct EventLog {
    ring: Mutex<Ring>,
    stream_group: StreamGroup,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        let log = Arc::new(EventLog {
            ring: Mutex::new(Ring {
                buffer: VecDeque::new(),
            }),
            stream_group: StreamGroup::new(),
        });
        let populate_target = Arc::clone(&log);
        log.stream_group
            .set_populate(move |stream| populate_target.populate(stream));
        log
    }

    fn populate(&self, stream: &crate::stream_group::Stream) {
        let ring = self.ring.lock().unwrap();
        let bytes: Vec<u8> = ring.buffer.iter().copied().collect();
        stream.write(&String::from_utf8_lossy(&bytes));
    }

    /// Appends a line (a trailing `\n` is added if missing) to the ring
    /// buffer and broadcasts it to every live subscriber.
    pub fn log(&self, line: &str) {
        let mut text = line.to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }

        {
            let mut ring = self.ring.lock().unwrap();
            for byte in text.bytes() {
                ring.buffer.push_back(byte);
            }
            while ring.buffer.len() > RING_CAPACITY {
                ring.buffer.pop_front();
            }
        }

        self.stream_group.write(&text);
    }

    pub fn subscribe(&self) -> Arc<crate::stream_group::Stream> {
        self.stream_group.new_stream()
    }

    pub fn close(&self) {
        self.stream_group.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn late_subscriber_sees_ring_buffer_history() {
        let log = EventLog::new();
        log.log("first event");
        log.log("second event");

        let stream = log.subscribe();
        let seen = stream.read(4096, false).unwrap();
        assert_eq!(seen, b"first event\nsecond event\n");
    }

    #[test]
    fn live_subscriber_sees_later_events() {
        let log = EventLog::new();
        let stream = log.subscribe();
        log.log("hello");
        assert_eq!(stream.read(4096, false).unwrap(), b"hello\n");
    }

    #[test]
    fn ring_buffer_is_bounded() {
        let log = EventLog::new();
        let line = "x".repeat(1000);
        for _ in 0..100 {
            log.log(&line);
        }
        let ring_len = log.ring.lock().unwrap().buffer.len();
        assert!(ring_len <= RING_CAPACITY);
    }
}
