//! `getattr`.
//!
//! Builds a `FileAttr` from the size `FsAdapter::entry_info` resolved:
//! folders get a synthetic 4096-byte directory entry, files report the
//! size as already computed there (the exact, HEAD-derived size -- see
//! the note on `entry_info` for why `getattr` is allowed to trigger one).

use super::prelude::*;

pub(crate) fn build_attr(ino: u64, info: &EntryInfo) -> FileAttr {
    let (kind, perm, size) = match info.kind {
        FileType::Directory => (FileType::Directory, 0o555, 4096),
        _ => (FileType::RegularFile, 0o444, info.size),
    };
    FileAttr {
        ino,
        size,
        blocks: size.div_ceil(512),
        atime: UNIX_EPOCH,
        mtime: UNIX_EPOCH,
        ctime: UNIX_EPOCH,
        crtime: UNIX_EPOCH,
        kind,
        perm,
        nlink: 1,
        uid: 0,
        gid: 0,
        rdev: 0,
        flags: 0,
        blksize: 512,
    }
}

pub fn getattr(fs: &mut FsAdapter, _req: &Request, ino: u64, reply: ReplyAttr) {
    let Some(path) = fs.path_for_inode(ino) else {
        reply.error(ENOENT);
        return;
    };
    match fs.entry_info(path) {
        Ok(info) => reply.attr(&TTL, &build_attr(ino, &info)),
        Err(e) => reply.error(e.errno()),
    }
}
