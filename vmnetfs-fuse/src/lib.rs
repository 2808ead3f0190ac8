//! Mounts the read-only virtual namespace (§4.9: `config`, `log`, and per-
//! image `image`/`stats/*`/`streams/*`) over FUSE. Mirrors the role
//! `pbs-fuse-loop`/`pbs-pxar-fuse` play for proxmox-backup: a thin binding
//! layer over a pure, independently-testable tree of path/operation logic.

pub mod fs;
pub mod namespace;

pub use fs::VmnetFs;
pub use namespace::Namespace;
