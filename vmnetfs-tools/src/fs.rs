//! Directory/file helpers for the pristine and modified stores.
//!
//! The pattern here — write to a sibling temporary file, then rename into
//! place — is the same "atomic write" idiom `pbs-datastore::chunk_store`
//! relies on (`proxmox_sys::fs::replace_file`); we just implement it
//! directly since that crate isn't part of this workspace.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Creates `path` and all of its parent directories, tolerating the
/// "already exists" case (unlike `std::fs::create_dir_all` callers don't
/// need a separate existence check).
pub fn create_dir_all(path: &Path) -> io::Result<()> {
    match fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(err),
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!(".{}.tmp.{}", file_name, std::process::id()))
}

/// Writes `data` to `path` atomically: the new content never appears
/// partially written to a reader who opens `path` concurrently, because the
/// bytes land at a temporary sibling path first and only then get renamed
/// into place.
///
/// When `fsync` is set, the temporary file's contents and the containing
/// directory entry are both flushed to disk before returning, matching the
/// `DatastoreFSyncLevel::File` durability level the teacher's chunk store
/// supports.
pub fn replace_file(path: &Path, data: &[u8], fsync: bool) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    create_dir_all(dir)?;

    let tmp_path = tmp_path_for(path);
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&tmp_path)?;
    file.write_all(data)?;
    if fsync {
        file.sync_all()?;
    }
    drop(file);

    fs::rename(&tmp_path, path)?;

    if fsync {
        if let Ok(dir_handle) = File::open(dir) {
            let _ = nix::unistd::fsync(dir_handle.as_raw_fd());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_file_is_atomic_looking() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("chunk");
        replace_file(&path, b"hello", false).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");

        // overwrite
        replace_file(&path, b"world!", false).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"world!");

        // no leftover temp files
        let siblings: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(siblings.len(), 1);
    }
}
