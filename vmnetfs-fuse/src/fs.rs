//! The `fuser::Filesystem` adapter: translates kernel requests into
//! [`Namespace`] lookups and [`Image`]/stream/counter operations. Kept thin
//! deliberately — everything that can be tested without a kernel lives in
//! `namespace.rs`; this module only wires fuser's reply-callback API to it,
//! the way `pbs-pxar-fuse`'s `Session` wires libfuse's callbacks to a pxar
//! archive.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use fuser::{
    Errno, FileAttr, FileHandle, FileType, Filesystem, Generation, INodeNo, MountOption,
    OpenFlags, PollNotifier, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyPoll, ReplyWrite, Request,
};
use vmnetfs_datastore::{ChangeHandle, Stream};

use crate::namespace::{self, CounterKind, Entry, Namespace, NodeKind, StreamKind};

const TTL: Duration = Duration::from_secs(1);

/// Per-open-file state. Counters snapshot their value at open time (§4.9:
/// "reading them yields the snapshot at the time of open"); the attached
/// [`ChangeHandle`] is what lets `poll` tell a client the snapshot is stale.
enum OpenState {
    None,
    Counter {
        content: Vec<u8>,
        change: ChangeHandle,
    },
    Stream(std::sync::Arc<Stream>),
}

pub struct VmnetFs {
    namespace: Namespace,
    handles: Mutex<HashMap<u64, OpenState>>,
    next_fh: AtomicU64,
}

impl VmnetFs {
    pub fn new(namespace: Namespace) -> Self {
        VmnetFs {
            namespace,
            handles: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        }
    }

    pub fn mount_options() -> Vec<MountOption> {
        vec![
            MountOption::FSName("vmnetfs".to_string()),
            MountOption::DefaultPermissions,
        ]
    }

    fn alloc_fh(&self, state: OpenState) -> FileHandle {
        let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
        self.handles.lock().unwrap().insert(fh, state);
        FileHandle(fh)
    }

    fn attr_for(&self, ino: u64, entry: &Entry) -> FileAttr {
        let (kind, perm, size) = match &entry.kind {
            NodeKind::Dir => (FileType::Directory, 0o500, 0),
            other => {
                let perm = namespace::perm_for(other);
                let size = match other {
                    NodeKind::Image(name) => {
                        self.namespace.image(name).map(|i| i.size()).unwrap_or(0)
                    }
                    _ => self.namespace.static_size(other).unwrap_or(0),
                };
                (FileType::RegularFile, perm, size)
            }
        };

        let uid = nix::unistd::geteuid().as_raw();
        let gid = nix::unistd::getegid().as_raw();

        FileAttr {
            ino: INodeNo(ino),
            size,
            blocks: size.div_ceil(512),
            atime: SystemTime::UNIX_EPOCH,
            mtime: SystemTime::UNIX_EPOCH,
            ctime: SystemTime::UNIX_EPOCH,
            crtime: SystemTime::UNIX_EPOCH,
            kind,
            perm,
            nlink: if matches!(entry.kind, NodeKind::Dir) { 2 } else { 1 },
            uid,
            gid,
            rdev: 0,
            flags: 0,
            blksize: 4096,
        }
    }
}

impl Filesystem for VmnetFs {
    fn lookup(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(Errno::ENOENT);
            return;
        };
        match self.namespace.lookup_child(u64::from(parent), name) {
            Some(ino) => {
                let entry = self.namespace.entry(ino).expect("just resolved");
                reply.entry(&TTL, &self.attr_for(ino, entry), Generation(0));
            }
            None => reply.error(Errno::ENOENT),
        }
    }

    fn getattr(&self, _req: &Request, ino: INodeNo, _fh: Option<FileHandle>, reply: ReplyAttr) {
        match self.namespace.entry(u64::from(ino)) {
            Some(entry) => reply.attr(&TTL, &self.attr_for(u64::from(ino), entry)),
            None => reply.error(Errno::ENOENT),
        }
    }

    fn setattr(
        &self,
        _req: &Request,
        ino: INodeNo,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<FileHandle>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<fuser::BsdFileFlags>,
        reply: ReplyAttr,
    ) {
        let Some(entry) = self.namespace.entry(u64::from(ino)) else {
            reply.error(Errno::ENOENT);
            return;
        };
        if let (NodeKind::Image(name), Some(new_size)) = (&entry.kind, size) {
            let Some(image) = self.namespace.image(name) else {
                reply.error(Errno::ENOENT);
                return;
            };
            if image.truncate(new_size).is_err() {
                reply.error(Errno::EIO);
                return;
            }
        }
        reply.attr(&TTL, &self.attr_for(u64::from(ino), entry));
    }

    fn open(&self, _req: &Request, ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        let Some(entry) = self.namespace.entry(u64::from(ino)) else {
            reply.error(Errno::ENOENT);
            return;
        };

        let state = match &entry.kind {
            NodeKind::Counter(name, kind) => match self.namespace.image(name) {
                Some(image) => {
                    let counter = match kind {
                        CounterKind::BytesRead => &image.bytes_read,
                        CounterKind::BytesWritten => &image.bytes_written,
                        CounterKind::ChunkFetches => &image.chunk_fetches,
                        CounterKind::ChunkDirties => &image.chunk_dirties,
                        CounterKind::IoErrors => &image.io_errors,
                    };
                    let (value, change) = counter.get();
                    OpenState::Counter {
                        content: namespace::decimal_line(value).into_bytes(),
                        change,
                    }
                }
                None => {
                    reply.error(Errno::ENOENT);
                    return;
                }
            },
            NodeKind::Stream(name, kind) => match self.namespace.image(name) {
                Some(image) => {
                    let stream = match kind {
                        StreamKind::ChunksAccessed => image.accessed_map.subscribe(),
                        StreamKind::ChunksCached => image.present_map.subscribe(),
                        StreamKind::ChunksModified => image.modified_map.subscribe(),
                        StreamKind::Io => image.subscribe_io(),
                    };
                    OpenState::Stream(stream)
                }
                None => {
                    reply.error(Errno::ENOENT);
                    return;
                }
            },
            NodeKind::Log => OpenState::Stream(self.namespace.event_log().subscribe()),
            _ => OpenState::None,
        };

        reply.opened(self.alloc_fh(state), fuser::FopenFlags::empty());
    }

    fn read(
        &self,
        _req: &Request,
        ino: INodeNo,
        fh: FileHandle,
        offset: u64,
        size: u32,
        _read_flags: fuser::ReadFlags,
        flags: u32,
        _lock_owner: Option<fuser::LockOwner>,
        reply: ReplyData,
    ) {
        let Some(entry) = self.namespace.entry(u64::from(ino)) else {
            reply.error(Errno::ENOENT);
            return;
        };

        match &entry.kind {
            NodeKind::Config => {
                let text = self.namespace.config_text();
                reply.data(slice_at(text.as_bytes(), offset, size));
            }
            NodeKind::FixedChunkSize(name) => {
                let Some(image) = self.namespace.image(name) else {
                    reply.error(Errno::ENOENT);
                    return;
                };
                let content = namespace::decimal_line(image.chunk_size());
                reply.data(slice_at(content.as_bytes(), offset, size));
            }
            NodeKind::FixedChunkCount(name) => {
                let Some(image) = self.namespace.image(name) else {
                    reply.error(Errno::ENOENT);
                    return;
                };
                let content = namespace::decimal_line(image.chunk_count());
                reply.data(slice_at(content.as_bytes(), offset, size));
            }
            NodeKind::Counter(..) => {
                let handles = self.handles.lock().unwrap();
                match handles.get(&fh.0) {
                    Some(OpenState::Counter { content, .. }) => {
                        reply.data(slice_at(content, offset, size))
                    }
                    _ => reply.error(Errno::EIO),
                }
            }
            NodeKind::Stream(..) | NodeKind::Log => {
                let stream = {
                    let handles = self.handles.lock().unwrap();
                    match handles.get(&fh.0) {
                        Some(OpenState::Stream(stream)) => stream.clone(),
                        _ => {
                            reply.error(Errno::EIO);
                            return;
                        }
                    }
                };
                let blocking = flags & libc::O_NONBLOCK as u32 == 0;
                match stream.read(size as usize, blocking) {
                    Ok(data) => reply.data(&data),
                    Err(vmnetfs_datastore::StreamReadError::WouldBlock) => {
                        reply.error(Errno::EWOULDBLOCK)
                    }
                }
            }
            NodeKind::Image(name) => {
                let Some(image) = self.namespace.image(name) else {
                    reply.error(Errno::ENOENT);
                    return;
                };
                let mut buf = vec![0u8; size as usize];
                match image.read(&mut buf, offset, size as usize, &|| false) {
                    Ok(n) => reply.data(&buf[..n]),
                    Err(_) => reply.error(Errno::EIO),
                }
            }
            NodeKind::Dir => reply.error(Errno::EISDIR),
        }
    }

    fn write(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: i64,
        data: &[u8],
        _write_flags: fuser::WriteFlags,
        _flags: OpenFlags,
        _lock_owner: Option<fuser::LockOwner>,
        reply: ReplyWrite,
    ) {
        let Some(entry) = self.namespace.entry(u64::from(ino)) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let NodeKind::Image(name) = &entry.kind else {
            reply.error(Errno::EACCES);
            return;
        };
        let Some(image) = self.namespace.image(name) else {
            reply.error(Errno::ENOENT);
            return;
        };
        match image.write(data, offset as u64, data.len(), &|| false) {
            Ok(n) => reply.written(n as u32),
            Err(_) => reply.error(Errno::EIO),
        }
    }

    fn release(
        &self,
        _req: &Request,
        _ino: INodeNo,
        fh: FileHandle,
        _flags: OpenFlags,
        _lock_owner: Option<fuser::LockOwner>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.handles.lock().unwrap().remove(&fh.0);
        reply.ok();
    }

    fn poll(
        &self,
        _req: &Request,
        _ino: INodeNo,
        fh: FileHandle,
        ph: PollNotifier,
        _events: fuser::PollEvents,
        _flags: fuser::PollFlags,
        reply: ReplyPoll,
    ) {
        let mut handles = self.handles.lock().unwrap();
        match handles.get_mut(&fh.0) {
            Some(OpenState::Counter { change, .. }) => {
                if change.is_changed() {
                    reply.poll(fuser::PollEvents::POLLIN);
                } else {
                    change.attach_poll(Box::new(move || {
                        let _ = ph.notify();
                    }));
                    reply.poll(fuser::PollEvents::empty());
                }
            }
            _ => reply.poll(fuser::PollEvents::POLLIN),
        }
    }

    fn opendir(&self, _req: &Request, _ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        reply.opened(FileHandle(0), fuser::FopenFlags::empty());
    }

    fn readdir(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        mut reply: ReplyDirectory,
    ) {
        let ino = u64::from(ino);
        if self.namespace.entry(ino).is_none() {
            reply.error(Errno::ENOENT);
            return;
        }

        let mut entries = vec![
            (ino, FileType::Directory, ".".to_string()),
            (ino, FileType::Directory, "..".to_string()),
        ];
        for &child_ino in self.namespace.children(ino) {
            let child = self.namespace.entry(child_ino).expect("listed child");
            let kind = if matches!(child.kind, NodeKind::Dir) {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            entries.push((child_ino, kind, child.name.clone()));
        }

        for (i, (child_ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(INodeNo(child_ino), (i + 1) as u64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }
}

fn slice_at(data: &[u8], offset: u64, size: u32) -> &[u8] {
    let offset = offset as usize;
    if offset >= data.len() {
        return &[];
    }
    let end = (offset + size as usize).min(data.len());
    &data[offset..end]
}
