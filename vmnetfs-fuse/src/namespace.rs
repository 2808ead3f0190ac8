//! Read-only mapping from path to a file-kind vtable (§4.9): a small,
//! explicit inode table built once at mount time from the set of
//! configured images, independent of the FUSE binding itself so it can be
//! unit-tested without a kernel. Mirrors the "fixed capability set
//! implemented per file kind; the namespace holds a table of kind + context
//! pointer" strategy from §9's "Dynamic dispatch" design note.

use std::collections::HashMap;
use std::sync::Arc;

use vmnetfs_datastore::{EventLog, Image};

pub const ROOT_INO: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    BytesRead,
    BytesWritten,
    ChunkFetches,
    ChunkDirties,
    IoErrors,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    ChunksAccessed,
    ChunksCached,
    ChunksModified,
    Io,
}

/// What a given inode is, and how its content/size are produced.
#[derive(Clone)]
pub enum NodeKind {
    Dir,
    /// `/config`: the censored session configuration.
    Config,
    /// `/log`: the process-global event log.
    Log,
    /// `/<image>/image`: the raw image file, readable and writable.
    Image(String),
    /// `/<image>/stats/<counter>`: a pollable decimal counter.
    Counter(String, CounterKind),
    /// `/<image>/stats/chunk_size` or `chunks`: a fixed unsigned integer
    /// that does not change once the image is mounted (`chunks` is
    /// re-derived from `current_size` on each read, since truncate can
    /// change it, but it carries no poll/change-notification machinery).
    FixedChunkSize(String),
    FixedChunkCount(String),
    /// `/<image>/streams/<name>`: a subscriber stream.
    Stream(String, StreamKind),
}

pub struct Entry {
    pub ino: u64,
    pub parent: u64,
    pub name: String,
    pub kind: NodeKind,
}

/// File mode bits per §6: counters and streams are 0400, `image` is 0600,
/// directories (never written to) are 0500.
pub fn perm_for(kind: &NodeKind) -> u16 {
    match kind {
        NodeKind::Dir => 0o500,
        NodeKind::Image(_) => 0o600,
        _ => 0o400,
    }
}

pub fn is_writable(kind: &NodeKind) -> bool {
    matches!(kind, NodeKind::Image(_))
}

/// The fixed, read-only-in-structure virtual filesystem tree. Content of
/// individual files changes as the underlying images mutate, but no
/// entries are ever added or removed once built.
pub struct Namespace {
    entries: Vec<Entry>,
    by_ino: HashMap<u64, usize>,
    children: HashMap<u64, Vec<u64>>,
    images: HashMap<String, Arc<Image>>,
    event_log: Arc<EventLog>,
    config_text: String,
}

impl Namespace {
    pub fn build(
        config_text: String,
        images: HashMap<String, Arc<Image>>,
        event_log: Arc<EventLog>,
    ) -> Self {
        let mut entries = vec![Entry {
            ino: ROOT_INO,
            parent: ROOT_INO,
            name: String::new(),
            kind: NodeKind::Dir,
        }];
        let mut next_ino = ROOT_INO + 1;
        let mut alloc = |kind: NodeKind, parent: u64, name: &str, entries: &mut Vec<Entry>| -> u64 {
            let ino = next_ino;
            next_ino += 1;
            entries.push(Entry {
                ino,
                parent,
                name: name.to_string(),
                kind,
            });
            ino
        };

        alloc(NodeKind::Config, ROOT_INO, "config", &mut entries);
        alloc(NodeKind::Log, ROOT_INO, "log", &mut entries);

        let mut image_names: Vec<&String> = images.keys().collect();
        image_names.sort();
        for name in image_names {
            let image_ino = alloc(NodeKind::Dir, ROOT_INO, name, &mut entries);
            alloc(NodeKind::Image(name.clone()), image_ino, "image", &mut entries);

            let stats_ino = alloc(NodeKind::Dir, image_ino, "stats", &mut entries);
            alloc(
                NodeKind::Counter(name.clone(), CounterKind::BytesRead),
                stats_ino,
                "bytes_read",
                &mut entries,
            );
            alloc(
                NodeKind::Counter(name.clone(), CounterKind::BytesWritten),
                stats_ino,
                "bytes_written",
                &mut entries,
            );
            alloc(
                NodeKind::Counter(name.clone(), CounterKind::ChunkFetches),
                stats_ino,
                "chunk_fetches",
                &mut entries,
            );
            alloc(
                NodeKind::Counter(name.clone(), CounterKind::ChunkDirties),
                stats_ino,
                "chunk_dirties",
                &mut entries,
            );
            alloc(
                NodeKind::Counter(name.clone(), CounterKind::IoErrors),
                stats_ino,
                "io_errors",
                &mut entries,
            );
            alloc(
                NodeKind::FixedChunkSize(name.clone()),
                stats_ino,
                "chunk_size",
                &mut entries,
            );
            alloc(
                NodeKind::FixedChunkCount(name.clone()),
                stats_ino,
                "chunks",
                &mut entries,
            );

            let streams_ino = alloc(NodeKind::Dir, image_ino, "streams", &mut entries);
            alloc(
                NodeKind::Stream(name.clone(), StreamKind::ChunksAccessed),
                streams_ino,
                "chunks_accessed",
                &mut entries,
            );
            alloc(
                NodeKind::Stream(name.clone(), StreamKind::ChunksCached),
                streams_ino,
                "chunks_cached",
                &mut entries,
            );
            alloc(
                NodeKind::Stream(name.clone(), StreamKind::ChunksModified),
                streams_ino,
                "chunks_modified",
                &mut entries,
            );
            alloc(
                NodeKind::Stream(name.clone(), StreamKind::Io),
                streams_ino,
                "io",
                &mut entries,
            );
        }

        let mut by_ino = HashMap::new();
        let mut children: HashMap<u64, Vec<u64>> = HashMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            by_ino.insert(entry.ino, idx);
            if entry.ino != ROOT_INO {
                children.entry(entry.parent).or_default().push(entry.ino);
            }
        }

        Namespace {
            entries,
            by_ino,
            children,
            images,
            event_log,
            config_text,
        }
    }

    pub fn entry(&self, ino: u64) -> Option<&Entry> {
        self.by_ino.get(&ino).map(|&idx| &self.entries[idx])
    }

    pub fn children(&self, ino: u64) -> &[u64] {
        self.children.get(&ino).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn lookup_child(&self, parent: u64, name: &str) -> Option<u64> {
        self.children(parent)
            .iter()
            .copied()
            .find(|&ino| self.entry(ino).map(|e| e.name == name).unwrap_or(false))
    }

    pub fn image(&self, name: &str) -> Option<&Arc<Image>> {
        self.images.get(name)
    }

    pub fn event_log(&self) -> &Arc<EventLog> {
        &self.event_log
    }

    pub fn config_text(&self) -> &str {
        &self.config_text
    }

    /// The content/size a `getattr`-style call should report for `ino`:
    /// `None` for directories and live-sized files (image, streams).
    pub fn static_size(&self, kind: &NodeKind) -> Option<u64> {
        match kind {
            NodeKind::Dir | NodeKind::Image(_) => None,
            NodeKind::Counter(..) | NodeKind::Stream(..) => Some(0),
            NodeKind::Config => Some(self.config_text.len() as u64),
            NodeKind::Log => Some(0),
            NodeKind::FixedChunkSize(name) => self
                .images
                .get(name)
                .map(|image| decimal_line(image.chunk_size()).len() as u64),
            NodeKind::FixedChunkCount(name) => self
                .images
                .get(name)
                .map(|image| decimal_line(image.chunk_count()).len() as u64),
        }
    }

    pub fn counter_value(&self, name: &str, kind: CounterKind) -> Option<u64> {
        let image = self.images.get(name)?;
        Some(match kind {
            CounterKind::BytesRead => image.bytes_read.value(),
            CounterKind::BytesWritten => image.bytes_written.value(),
            CounterKind::ChunkFetches => image.chunk_fetches.value(),
            CounterKind::ChunkDirties => image.chunk_dirties.value(),
            CounterKind::IoErrors => image.io_errors.value(),
        })
    }
}

/// Renders a counter/fixed-integer file's content: a decimal value
/// followed by a newline (§4.9).
pub fn decimal_line(value: u64) -> String {
    format!("{value}\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmnetfs_client::Transport;
    use vmnetfs_types::{CacheConfig, ImageConfig, OriginConfig};

    fn one_image(path: &std::path::Path) -> HashMap<String, Arc<Image>> {
        let config = ImageConfig {
            name: "disk".to_string(),
            origin: OriginConfig {
                url: "https://origin.example/disk.img".to_string(),
                credentials: None,
                offset: None,
                segment_size: None,
                cookies: Default::default(),
                validators: None,
            },
            size: 1_048_576,
            cache: CacheConfig {
                path: path.display().to_string(),
                chunk_size: 131_072,
            },
        };
        let transport = Arc::new(Transport::new().unwrap());
        let image = Image::init(&config, transport, EventLog::new()).unwrap();
        let mut map = HashMap::new();
        map.insert("disk".to_string(), image);
        map
    }

    #[test]
    fn builds_expected_tree_shape() {
        let dir = tempfile::tempdir().unwrap();
        let ns = Namespace::build(String::new(), one_image(dir.path()), EventLog::new());

        let config_ino = ns.lookup_child(ROOT_INO, "config").unwrap();
        assert!(matches!(ns.entry(config_ino).unwrap().kind, NodeKind::Config));

        let disk_ino = ns.lookup_child(ROOT_INO, "disk").unwrap();
        let image_ino = ns.lookup_child(disk_ino, "image").unwrap();
        assert!(matches!(ns.entry(image_ino).unwrap().kind, NodeKind::Image(_)));

        let stats_ino = ns.lookup_child(disk_ino, "stats").unwrap();
        let bytes_read_ino = ns.lookup_child(stats_ino, "bytes_read").unwrap();
        assert!(matches!(
            ns.entry(bytes_read_ino).unwrap().kind,
            NodeKind::Counter(_, CounterKind::BytesRead)
        ));

        let streams_ino = ns.lookup_child(disk_ino, "streams").unwrap();
        assert!(ns.lookup_child(streams_ino, "io").is_some());
        assert!(ns.lookup_child(streams_ino, "chunks_accessed").is_some());
    }

    #[test]
    fn image_file_perm_is_0600_others_are_0400_or_0500() {
        let dir = tempfile::tempdir().unwrap();
        let ns = Namespace::build(String::new(), one_image(dir.path()), EventLog::new());
        let disk_ino = ns.lookup_child(ROOT_INO, "disk").unwrap();
        let image_ino = ns.lookup_child(disk_ino, "image").unwrap();
        assert_eq!(perm_for(&ns.entry(image_ino).unwrap().kind), 0o600);

        let stats_ino = ns.lookup_child(disk_ino, "stats").unwrap();
        let bytes_read_ino = ns.lookup_child(stats_ino, "bytes_read").unwrap();
        assert_eq!(perm_for(&ns.entry(bytes_read_ino).unwrap().kind), 0o400);
        assert_eq!(perm_for(&ns.entry(disk_ino).unwrap().kind), 0o500);
    }

    #[test]
    fn counter_value_reflects_image_counters() {
        let dir = tempfile::tempdir().unwrap();
        let images = one_image(dir.path());
        let image = images.get("disk").unwrap().clone();
        image.bytes_read.add(42);
        let ns = Namespace::build(String::new(), images, EventLog::new());
        assert_eq!(ns.counter_value("disk", CounterKind::BytesRead), Some(42));
    }
}
