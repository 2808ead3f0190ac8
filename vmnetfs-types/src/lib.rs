//! Shared configuration records and the error taxonomy (§7) used across the
//! vmnetfs workspace. Mirrors the role `pbs-api-types` plays for
//! proxmox-backup: a dependency-light crate every other crate can sit on
//! top of without pulling in the datastore or transport stacks.

pub mod config;
pub mod error;

pub use config::{CacheConfig, Credentials, ImageConfig, OriginConfig, SessionConfig, Validators};
pub use error::{CacheError, ConfigError, ImageError, TransportError};
