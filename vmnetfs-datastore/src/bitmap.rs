//! A dynamically-sized set of non-negative integers with a "newly set"
//! notification stream, used for `accessed_map`, `present_map`, and
//! `modified_map`.
//!
//! Grounded on the bit-twiddling idiom `pbs-datastore::index::IndexFile`
//! style bitmaps use, generalized with a [`StreamGroup`] populate callback so
//! a late subscriber sees every bit already set before any new one.

use std::sync::{Arc, Mutex};

use crate::stream_group::StreamGroup;

struct Inner {
    bits: Vec<u8>,
}

impl Inner {
    fn grow_to_fit(&mut self, byte_index: usize) {
        if byte_index >= self.bits.len() {
            let mut new_len = self.bits.len().max(1);
            while new_len <= byte_index {
                new_len *= 2;
            }
            self.bits.resize(new_len, 0);
        }
    }
}

/// A growable bit set whose "just became set" events fan out to any number
/// of subscribers via a [`StreamGroup`].
pub struct Bitmap {
    inner: Mutex<Inner>,
    stream_group: StreamGroup,
}

impl Bitmap {
    pub fn new() -> Arc<Self> {
        let bitmap = Arc::new(Bitmap {
            inner: Mutex::new(Inner { bits: Vec::new() }),
            stream_group: StreamGroup::new(),
        });
        let populate_target = Arc::clone(&bitmap);
        bitmap
            .stream_group
            .set_populate(move |stream| populate_target.populate(stream));
        bitmap
    }

    /// Idempotently adds `index` to the set. Returns `true` if this call was
    /// the one that flipped the bit from 0 to 1.
    pub fn set(&self, index: u64) -> bool {
        let index = index as usize;
        let byte_index = index / 8;
        let bit = 1u8 << (index % 8);

        let newly_set = {
            let mut inner = self.inner.lock().unwrap();
            inner.grow_to_fit(byte_index);
            let was_set = inner.bits[byte_index] & bit != 0;
            inner.bits[byte_index] |= bit;
            !was_set
        };

        if newly_set {
            self.stream_group.write(&format!("{}\n", index));
        }
        newly_set
    }

    pub fn test(&self, index: u64) -> bool {
        let index = index as usize;
        let byte_index = index / 8;
        let bit = 1u8 << (index % 8);
        let inner = self.inner.lock().unwrap();
        byte_index < inner.bits.len() && inner.bits[byte_index] & bit != 0
    }

    fn populate(&self, stream: &crate::stream_group::Stream) {
        let inner = self.inner.lock().unwrap();
        for (byte_index, byte) in inner.bits.iter().enumerate() {
            if *byte == 0 {
                continue;
            }
            for bit in 0..8 {
                if byte & (1 << bit) != 0 {
                    stream.write(&format!("{}\n", byte_index * 8 + bit));
                }
            }
        }
    }

    /// Opens a subscriber stream that first replays every currently-set
    /// index, then receives each newly-set index as it is added.
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
    fn set_is_idempotent_and_reports_first_set() {
        let bitmap = Bitmap::new();
        assert!(bitmap.set(5));
        assert!(!bitmap.test(0));
        assert!(bitmap.test(5));
        assert!(!bitmap.set(5));
    }

    #[test]
    fn grows_to_fit_large_indices() {
        let bitmap = Bitmap::new();
        assert!(bitmap.set(10_000));
        assert!(bitmap.test(10_000));
        assert!(!bitmap.test(9_999));
    }

    #[test]
    fn subscriber_replays_existing_bits_then_sees_new_ones() {
        let bitmap = Bitmap::new();
        bitmap.set(1);
        bitmap.set(3);

        let stream = bitmap.subscribe();
        let seeded = stream.read(64, false).unwrap();
        assert_eq!(seeded, b"1\n3\n");

        bitmap.set(7);
        let more = stream.read(64, false).unwrap();
        assert_eq!(more, b"7\n");
    }
}
