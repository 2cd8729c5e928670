//! `lookup` / `readdir` / `open` / `read`.
//!
//! All four resolve the kernel-supplied inode to a `Path` and round-trip
//! through the bridge (`run_sync`, via `FsAdapter`'s helper methods) onto
//! the engine loop -- except `read`, which (after `open` has already
//! ensured the file is downloaded and registered a descriptor) reads
//! straight from the adapter-local file-handle table with no engine
//! round-trip at all.

use super::attr::build_attr;
use super::prelude::*;

pub fn lookup(fs: &mut FsAdapter, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
    let Some(parent_path) = fs.path_for_inode(parent) else {
        reply.error(ENOENT);
        return;
    };
    let Some(name) = name.to_str() else {
        reply.error(ENOENT);
        return;
    };
    let child_path = parent_path.join(name);
    match fs.entry_info(child_path.clone()) {
        Ok(info) => {
            let ino = fs.inode_for_path(&child_path);
            reply.entry(&TTL, &build_attr(ino, &info), 0);
        }
        Err(e) => reply.error(e.errno()),
    }
}

pub fn readdir(fs: &mut FsAdapter, _req: &Request, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
    let Some(path) = fs.path_for_inode(ino) else {
        reply.error(ENOENT);
        return;
    };

    let parent_ino = if path == *fs.root_prefix() {
        ROOT_INODE
    } else {
        fs.inode_for_path(&path.parent())
    };

    let mut entries: Vec<(u64, FileType, String)> = vec![
        (ino, FileType::Directory, ".".to_string()),
        (parent_ino, FileType::Directory, "..".to_string()),
    ];

    match fs.list_children(path.clone()) {
        Ok(children) => {
            for (name, kind) in children {
                let child_ino = fs.inode_for_path(&path.join(&name));
                entries.push((child_ino, kind, name));
            }
        }
        Err(e) => {
            reply.error(e.errno());
            return;
        }
    }

    for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
        if reply.add(ino, (i + 1) as i64, kind, &name) {
            break; // reply buffer full; kernel will call readdir again with a later offset
        }
    }
    reply.ok();
}

/// Obtains the local cache path (triggering a fetch if absent), opens it
/// read-only, and hands the kernel a descriptor the adapter owns until
/// `release`.
pub fn open(fs: &mut FsAdapter, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
    if flags & (libc::O_WRONLY | libc::O_RDWR) != 0 {
        reply.error(EACCES);
        return;
    }
    let Some(path) = fs.path_for_inode(ino) else {
        reply.error(ENOENT);
        return;
    };
    let local_path = match fs.open_local_path(path) {
        Ok(p) => p,
        Err(e) => {
            reply.error(e.errno());
            return;
        }
    };
    match std::fs::File::open(&local_path) {
        Ok(file) => reply.opened(fs.register_open_file(file), 0),
        Err(_) => reply.error(EBADF),
    }
}

pub fn read(
    fs: &mut FsAdapter,
    _req: &Request,
    _ino: u64,
    fh: u64,
    offset: i64,
    size: u32,
    _flags: i32,
    _lock_owner: Option<u64>,
    reply: ReplyData,
) {
    match fs.read_from_handle(fh, offset as u64, size) {
        Some(data) => reply.data(&data),
        None => reply.error(EBADF),
    }
}
