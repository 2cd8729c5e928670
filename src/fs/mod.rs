//! FUSE adapter.
//!
//! `FsAdapter` is the sync-side face of the engine: it owns the inode
//! tables and open-file-handle table fuser needs, and turns every kernel
//! callback into one `run_sync` round-trip onto the engine thread. It
//! never touches `LazyFolder`/`AutoStore` state directly -- the `Path`
//! resolution and all cache/network decisions happen engine-side.
//!
//! `impl Filesystem` here only forwards to `attr`/`read`/`xattr`; this
//! crate's remote tree is read-only, so there is no
//! `write`/`create`/`delete`/`rename` dispatch -- those callbacks fall
//! through to `fuser`'s own default (`ENOSYS`) implementations.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use fuser::{FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyXattr, Request};

use crate::engine::{run_sync, EngineHost};
use crate::error::EngineError;
use crate::folder::resolve;
use crate::path::Path;

pub mod attr;
pub mod prelude;
mod read;
mod xattr;

pub const TTL: Duration = Duration::from_secs(1);

pub const ROOT_INODE: u64 = 1;

/// The node kind and size needed to build a `FileAttr`, resolved
/// engine-side by walking to the entry's parent and consulting its
/// cached listing.
pub(crate) struct EntryInfo {
    pub kind: FileType,
    pub size: u64,
}

pub struct FsAdapter {
    host: EngineHost,
    /// The engine-absolute path exposed as this mount's `/`; usually the
    /// engine root, but a CLI caller may mount an arbitrary subtree.
    root_prefix: Path,
    inode_to_path: Mutex<HashMap<u64, Path>>,
    path_to_inode: Mutex<HashMap<Path, u64>>,
    next_inode: AtomicU64,
    open_files: Mutex<HashMap<u64, std::fs::File>>,
    next_fh: AtomicU64,
}

impl FsAdapter {
    pub fn new(host: EngineHost, root_prefix: Path) -> Self {
        let mut inode_to_path = HashMap::new();
        let mut path_to_inode = HashMap::new();
        inode_to_path.insert(ROOT_INODE, root_prefix.clone());
        path_to_inode.insert(root_prefix.clone(), ROOT_INODE);
        Self {
            host,
            root_prefix,
            inode_to_path: Mutex::new(inode_to_path),
            path_to_inode: Mutex::new(path_to_inode),
            next_inode: AtomicU64::new(ROOT_INODE + 1),
            open_files: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        }
    }

    pub(crate) fn root_prefix(&self) -> &Path {
        &self.root_prefix
    }

    pub(crate) fn path_for_inode(&self, ino: u64) -> Option<Path> {
        self.inode_to_path.lock().unwrap().get(&ino).cloned()
    }

    pub(crate) fn inode_for_path(&self, path: &Path) -> u64 {
        if let Some(ino) = self.path_to_inode.lock().unwrap().get(path) {
            return *ino;
        }
        let ino = self.next_inode.fetch_add(1, Ordering::Relaxed);
        self.inode_to_path.lock().unwrap().insert(ino, path.clone());
        self.path_to_inode.lock().unwrap().insert(path.clone(), ino);
        ino
    }

    /// Resolves the entry at `path` by walking to its parent and
    /// consulting the cached listing -- a directory if `path` names a
    /// known subfolder, a regular file otherwise. Spec §4.M requires
    /// `getattr`/`lookup` to report the *exact* size, so a file whose size
    /// isn't yet known triggers the same on-demand HEAD as `exact_size`.
    pub(crate) fn entry_info(&self, path: Path) -> Result<EntryInfo, EngineError> {
        if path == self.root_prefix {
            return Ok(EntryInfo { kind: FileType::Directory, size: 0 });
        }
        let parent = path.parent();
        let name = path.name().expect("non-root path has a name").to_string();
        run_sync(&self.host, move |root, _engine| async move {
            let folder = resolve(&root, &parent).await?;
            let children = folder.children().await?;
            if children.folders.contains_key(&name) {
                return Ok(EntryInfo { kind: FileType::Directory, size: 0 });
            }
            let size = folder.exact_size(&name).await?;
            Ok(EntryInfo { kind: FileType::RegularFile, size })
        })
    }

    pub(crate) fn list_children(&self, path: Path) -> Result<Vec<(String, FileType)>, EngineError> {
        run_sync(&self.host, move |root, _engine| async move {
            let folder = resolve(&root, &path).await?;
            let children = folder.children().await?;
            let mut entries: Vec<(String, FileType)> = children
                .folders
                .keys()
                .map(|name| (name.clone(), FileType::Directory))
                .collect();
            entries.extend(children.files.iter().map(|name| (name.clone(), FileType::RegularFile)));
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(entries)
        })
    }

    pub(crate) fn open_local_path(&self, path: Path) -> Result<std::path::PathBuf, EngineError> {
        let parent = path.parent();
        let name = path.name().expect("non-root path has a name").to_string();
        run_sync(&self.host, move |root, _engine| async move {
            let folder = resolve(&root, &parent).await?;
            folder.cache_path(&name).await
        })
    }

    /// Registers an already-opened local cache file under a fresh handle,
    /// for the FUSE `open`/`read`/`release` trio: `open` obtains the cache
    /// path (fetching the file if needed) and returns an OS file
    /// descriptor.
    pub(crate) fn register_open_file(&self, file: std::fs::File) -> u64 {
        let fh = self.next_fh();
        self.open_files.lock().unwrap().insert(fh, file);
        fh
    }

    /// `pread`-style read from an open handle: doesn't perturb the file's
    /// shared seek position, so concurrent reads on the same handle from
    /// different kernel-request threads never race each other.
    pub(crate) fn read_from_handle(&self, fh: u64, offset: u64, size: u32) -> Option<Vec<u8>> {
        use std::os::unix::fs::FileExt;
        let files = self.open_files.lock().unwrap();
        let file = files.get(&fh)?;
        let mut buf = vec![0u8; size as usize];
        let n = file.read_at(&mut buf, offset).ok()?;
        buf.truncate(n);
        Some(buf)
    }

    fn next_fh(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::Relaxed)
    }
}

impl Filesystem for FsAdapter {
    fn lookup(&mut self, req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        read::lookup(self, req, parent, name, reply);
    }

    fn getattr(&mut self, req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        attr::getattr(self, req, ino, reply);
    }

    fn readdir(&mut self, req: &Request, ino: u64, fh: u64, offset: i64, reply: ReplyDirectory) {
        read::readdir(self, req, ino, fh, offset, reply);
    }

    fn open(&mut self, req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        read::open(self, req, ino, flags, reply);
    }

    fn read(
        &mut self,
        req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        flags: i32,
        lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        read::read(self, req, ino, fh, offset, size, flags, lock_owner, reply);
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.open_files.lock().unwrap().remove(&fh);
        reply.ok();
    }

    fn getxattr(&mut self, req: &Request, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        xattr::getxattr(self, req, ino, name, size, reply);
    }

    fn listxattr(&mut self, req: &Request, ino: u64, size: u32, reply: ReplyXattr) {
        xattr::listxattr(self, req, ino, size, reply);
    }

    /// No write path is ever exposed: every mutating callback replies
    /// `EACCES` rather than falling through to `fuser`'s default `ENOSYS`,
    /// so tools see "read-only filesystem" rather than "operation not
    /// supported".
    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        _fh: u64,
        _offset: i64,
        _data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        reply.error(libc::EACCES);
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request,
        _ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        reply.error(libc::EACCES);
    }

    // `lock`: left to `fuser`'s default `Filesystem` implementation, which
    // replies `ENOSYS` without this adapter needing to know the
    // kernel-lock callback's exact signature.
}
