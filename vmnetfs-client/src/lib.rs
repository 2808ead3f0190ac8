//! Pooled HTTP(S) ranged-GET transport (§4.5): retry, ETag/Last-Modified
//! validator enforcement, cookies, Basic/Digest auth, and cooperative
//! cancellation. Mirrors the role `pbs-client` plays for proxmox-backup,
//! narrowed to the one thing the image engine needs from an HTTP client.

pub mod digest_auth;
pub mod runtime;
pub mod transport;

pub use transport::{FetchRequest, Transport};
