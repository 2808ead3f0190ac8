//! Per-chunk exclusive lock, the mechanism that coalesces concurrent demand
//! for the same chunk: only one thread ever performs the fetch for a given
//! chunk, the rest block and then observe the populated cache.
//!
//! The VFS layer exposes cancellation as a plain predicate rather than a
//! wakeable channel, so waiters re-check it on a fixed poll interval instead
//! of being woken by it directly; a real lock release always wakes a waiter
//! immediately via the condition variable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vmnetfs_types::ImageError;

const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

struct EntryState {
    busy: bool,
    waiters: u32,
}

struct Entry {
    state: Mutex<EntryState>,
    cond: std::sync::Condvar,
}

/// A table of per-chunk locks, created lazily and torn down once uncontended.
pub struct ChunkLockTable {
    entries: Mutex<HashMap<u64, Arc<Entry>>>,
}

impl ChunkLockTable {
    pub fn new() -> Self {
        ChunkLockTable {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entry_for(&self, chunk: u64) -> Arc<Entry> {
        let mut entries = self.entries.lock().unwrap();
        Arc::clone(entries.entry(chunk).or_insert_with(|| {
            Arc::new(Entry {
                state: Mutex::new(EntryState {
                    busy: false,
                    waiters: 0,
                }),
                cond: std::sync::Condvar::new(),
            })
        }))
    }

    /// Blocks until the caller owns chunk `chunk`'s lock, or `is_interrupted`
    /// reports true while waiting. A thread that becomes the owner in the
    /// same wake that also observes interruption is treated as having
    /// acquired the lock successfully, so there is exactly one release path.
    pub fn acquire(
        &self,
        chunk: u64,
        is_interrupted: &dyn Fn() -> bool,
    ) -> Result<ChunkLockGuard<'_>, ImageError> {
        let entry = self.entry_for(chunk);
        let mut state = entry.state.lock().unwrap();

        if !state.busy {
            state.busy = true;
            return Ok(ChunkLockGuard { table: self, chunk });
        }

        state.waiters += 1;
        loop {
            let (new_state, _timed_out) =
                entry.cond.wait_timeout(state, INTERRUPT_POLL_INTERVAL).unwrap();
            state = new_state;

            if !state.busy {
                state.busy = true;
                state.waiters -= 1;
                return Ok(ChunkLockGuard { table: self, chunk });
            }

            if is_interrupted() {
                state.waiters -= 1;
                return Err(ImageError::Interrupted);
            }
        }
    }

    fn release(&self, chunk: u64) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(&chunk) {
            let mut state = entry.state.lock().unwrap();
            if state.waiters > 0 {
                state.busy = false;
                drop(state);
                entry.cond.notify_one();
            } else {
                drop(state);
                entries.remove(&chunk);
            }
        }
    }
}

impl Default for ChunkLockTable {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII handle on chunk `chunk`'s lock; releasing wakes a waiter if any.
pub struct ChunkLockGuard<'a> {
    table: &'a ChunkLockTable,
    chunk: u64,
}

impl Drop for ChunkLockGuard<'_> {
    fn drop(&mut self) {
        self.table.release(self.chunk);
    }
}
