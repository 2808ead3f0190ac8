//! A monotonic 64-bit counter with poll-style change notification, used for
//! `bytes_read`, `bytes_written`, `chunk_fetches`, `chunk_dirties`, and
//! `io_errors`.
//!
//! The notification side exists to let the namespace layer implement FUSE
//! `poll` on a counter file: a reader calls [`StatCounter::get`] to capture a
//! snapshot and a [`ChangeHandle`], then later calls `attach_poll` with a
//! callback that fires exactly once, either right away (if the counter
//! already moved) or the next time it does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type PollCallback = Box<dyn FnOnce() + Send>;

pub struct StatCounter {
    value: AtomicU64,
    generation: AtomicU64,
    next_waiter_id: AtomicU64,
    waiters: Mutex<HashMap<u64, PollCallback>>,
}

impl StatCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(StatCounter {
            value: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            next_waiter_id: AtomicU64::new(0),
            waiters: Mutex::new(HashMap::new()),
        })
    }

    /// Atomically adds `v` and wakes any poller attached since the last
    /// mutation.
    pub fn add(&self, v: u64) -> u64 {
        let new_value = self.value.fetch_add(v, Ordering::SeqCst) + v;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.fire_waiters();
        new_value
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Returns the current value together with a handle that can later tell
    /// whether the counter has moved since this call.
    pub fn get(self: &Arc<Self>) -> (u64, ChangeHandle) {
        let snapshot = self.generation.load(Ordering::SeqCst);
        let id = self.next_waiter_id.fetch_add(1, Ordering::SeqCst);
        (
            self.value(),
            ChangeHandle {
                counter: Arc::clone(self),
                snapshot,
                id,
            },
        )
    }

    fn register_waiter(&self, id: u64, callback: PollCallback) {
        self.waiters.lock().unwrap().insert(id, callback);
    }

    fn cancel_waiter(&self, id: u64) {
        self.waiters.lock().unwrap().remove(&id);
    }

    fn fire_waiters(&self) {
        let callbacks: Vec<PollCallback> = {
            let mut waiters = self.waiters.lock().unwrap();
            waiters.drain().map(|(_, cb)| cb).collect()
        };
        for callback in callbacks {
            callback();
        }
    }
}

/// A snapshot marker handed out by [`StatCounter::get`].
pub struct ChangeHandle {
    counter: Arc<StatCounter>,
    snapshot: u64,
    id: u64,
}

impl ChangeHandle {
    pub fn is_changed(&self) -> bool {
        self.counter.generation.load(Ordering::SeqCst) != self.snapshot
    }

    /// Registers a one-shot notification. Fires synchronously and
    /// immediately if the counter already changed since `get`; otherwise it
    /// fires on the next `add`.
    pub fn attach_poll(&self, callback: PollCallback) {
        if self.is_changed() {
            callback();
            return;
        }
        self.counter.register_waiter(self.id, callback);
    }
}

impl Drop for ChangeHandle {
    fn drop(&mut self) {
        self.counter.cancel_waiter(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn add_is_monotonic_and_visible() {
        let counter = StatCounter::new();
        assert_eq!(counter.add(3), 3);
        assert_eq!(counter.add(4), 7);
        assert_eq!(counter.value(), 7);
    }

    #[test]
    fn change_handle_detects_later_mutation() {
        let counter = StatCounter::new();
        let (_, handle) = counter.get();
        assert!(!handle.is_changed());
        counter.add(1);
        assert!(handle.is_changed());
    }

    #[test]
    fn attach_poll_fires_immediately_if_already_changed() {
        let counter = StatCounter::new();
        let (_, handle) = counter.get();
        counter.add(1);

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = Arc::clone(&fired);
        handle.attach_poll(Box::new(move || fired_clone.store(true, Ordering::SeqCst)));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn attach_poll_fires_on_next_mutation() {
        let counter = StatCounter::new();
        let (_, handle) = counter.get();

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = Arc::clone(&fired);
        handle.attach_poll(Box::new(move || fired_clone.store(true, Ordering::SeqCst)));
        assert!(!fired.load(Ordering::SeqCst));

        counter.add(1);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn dropping_handle_cancels_pending_notification() {
        let counter = StatCounter::new();
        let (_, handle) = counter.get();

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = Arc::clone(&fired);
        handle.attach_poll(Box::new(move || fired_clone.store(true, Ordering::SeqCst)));
        drop(handle);

        counter.add(1);
        assert!(!fired.load(Ordering::SeqCst));
    }
}
