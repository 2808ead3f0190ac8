//! The chunked image engine (§2-§5): bitmaps, the stat counter, stream
//! groups, the chunk lock table, the pristine and modified stores, the
//! process-global event log, and the `Image` that orchestrates all of them
//! into the read/write/truncate surface the namespace exposes. Mirrors the
//! role `pbs-datastore` plays for proxmox-backup.

pub mod bitmap;
pub mod chunk_lock;
pub mod event_log;
pub mod image;
pub mod modified_store;
pub mod pristine_store;
pub mod stat;
pub mod stream_group;

pub use bitmap::Bitmap;
pub use chunk_lock::{ChunkLockGuard, ChunkLockTable};
pub use event_log::EventLog;
pub use image::Image;
pub use modified_store::ModifiedStore;
pub use pristine_store::PristineStore;
pub use stat::{ChangeHandle, StatCounter};
pub use stream_group::{Stream, StreamGroup, StreamReadError};
