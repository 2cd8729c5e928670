//! Extended attributes.
//!
//! No extended attribute is ever stored. `getxattr` reports "no such
//! attribute", `listxattr` reports an empty list -- a safe "nothing
//! special here" answer to macOS Finder's `com.apple.*` probes and
//! anything else that asks, applied uniformly since this filesystem has
//! no xattr store at all.

use super::prelude::*;

pub fn getxattr(_fs: &mut FsAdapter, _req: &Request, _ino: u64, _name: &OsStr, _size: u32, reply: ReplyXattr) {
    #[cfg(target_os = "macos")]
    reply.error(ENOATTR);

    #[cfg(not(target_os = "macos"))]
    reply.error(ENODATA);
}

pub fn listxattr(_fs: &mut FsAdapter, _req: &Request, _ino: u64, size: u32, reply: ReplyXattr) {
    if size == 0 {
        reply.size(0);
    } else {
        reply.data(&[]);
    }
}
