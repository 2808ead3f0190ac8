//! Persistent on-disk cache of fetched, read-only chunks.
//!
//! Layout is `<cache_dir>/<bucket>/<chunk>` where
//! `bucket = (chunk / CHUNKS_PER_DIR) * CHUNKS_PER_DIR`, the same
//! bucketed-directory idiom `pbs-datastore::chunk_store` uses to avoid
//! dumping tens of thousands of entries into one directory — just keyed by
//! decimal chunk index instead of a hex content digest, since pristine
//! chunks are addressed positionally rather than by content hash.

use std::path::{Path, PathBuf};

use vmnetfs_types::CacheError;

const CHUNKS_PER_DIR: u64 = 4096;

pub struct PristineStore {
    cache_dir: PathBuf,
}

fn bucket_of(chunk: u64) -> u64 {
    (chunk / CHUNKS_PER_DIR) * CHUNKS_PER_DIR
}

impl PristineStore {
    fn chunk_path(&self, chunk: u64) -> PathBuf {
        self.cache_dir
            .join(bucket_of(chunk).to_string())
            .join(chunk.to_string())
    }

    /// Opens the on-disk cache directory and scans it to rebuild the set of
    /// chunks already present, without reading any of the recovered
    /// `present` bits into this store itself — callers fold them into the
    /// image's `present_map`.
    pub fn open(cache_dir: &Path, chunk_count: u64) -> Result<(Self, Vec<u64>), CacheError> {
        vmnetfs_tools::fs::create_dir_all(cache_dir)?;

        let store = PristineStore {
            cache_dir: cache_dir.to_path_buf(),
        };
        let mut present = Vec::new();

        for bucket_entry in std::fs::read_dir(cache_dir)? {
            let bucket_entry = bucket_entry?;
            let bucket_name = bucket_entry.file_name().to_string_lossy().into_owned();
            let bucket: u64 = match bucket_name.parse() {
                Ok(b) => b,
                Err(_) => continue,
            };
            if bucket % CHUNKS_PER_DIR != 0 {
                return Err(CacheError::CorruptEntry {
                    path: bucket_entry.path().display().to_string(),
                    reason: format!("bucket name {bucket} is not a multiple of {CHUNKS_PER_DIR}"),
                });
            }

            for chunk_entry in std::fs::read_dir(bucket_entry.path())? {
                let chunk_entry = chunk_entry?;
                let chunk_name = chunk_entry.file_name().to_string_lossy().into_owned();
                let chunk: u64 = chunk_name.parse().map_err(|_| CacheError::CorruptEntry {
                    path: chunk_entry.path().display().to_string(),
                    reason: "chunk file name is not a decimal integer".to_string(),
                })?;

                if bucket_of(chunk) != bucket {
                    return Err(CacheError::CorruptEntry {
                        path: chunk_entry.path().display().to_string(),
                        reason: format!("chunk {chunk} does not belong in bucket {bucket}"),
                    });
                }
                if chunk >= chunk_count {
                    return Err(CacheError::CorruptEntry {
                        path: chunk_entry.path().display().to_string(),
                        reason: format!(
                            "chunk {chunk} is out of range for an image of {chunk_count} chunks"
                        ),
                    });
                }
                present.push(chunk);
            }
        }

        Ok((store, present))
    }

    pub fn read_chunk(&self, chunk: u64) -> Result<Vec<u8>, CacheError> {
        let data = std::fs::read(self.chunk_path(chunk))?;
        Ok(data)
    }

    /// Writes the chunk atomically (write to a sibling temp file, rename),
    /// creating the bucket directory on first use.
    pub fn write_chunk(&self, chunk: u64, data: &[u8]) -> Result<(), CacheError> {
        let path = self.chunk_path(chunk);
        vmnetfs_tools::fs::replace_file(&path, data, true)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let (store, present) = PristineStore::open(dir.path(), 100).unwrap();
        assert!(present.is_empty());

        store.write_chunk(5, b"hello world").unwrap();
        assert_eq!(store.read_chunk(5).unwrap(), b"hello world");
    }

    #[test]
    fn open_recovers_present_chunks_across_buckets() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (store, _) = PristineStore::open(dir.path(), 20_000).unwrap();
            store.write_chunk(3, b"a").unwrap();
            store.write_chunk(4097, b"b").unwrap();
        }

        let (_, mut present) = PristineStore::open(dir.path(), 20_000).unwrap();
        present.sort_unstable();
        assert_eq!(present, vec![3, 4097]);
    }

    #[test]
    fn open_rejects_chunk_outside_initial_size() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (store, _) = PristineStore::open(dir.path(), 20_000).unwrap();
            store.write_chunk(10, b"x").unwrap();
        }

        let result = PristineStore::open(dir.path(), 5);
        assert!(matches!(result, Err(CacheError::CorruptEntry { .. })));
    }
}
