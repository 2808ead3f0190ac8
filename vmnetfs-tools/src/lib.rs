//! Small, dependency-light filesystem helpers shared by the pristine and
//! modified stores. Mirrors the role `pbs-tools` plays in proxmox-backup.

pub mod fs;
