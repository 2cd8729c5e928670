//! Common re-exports shared by `fs`'s sibling submodules (`attr`, `read`,
//! `xattr`).

pub use fuser::{FileAttr, FileType, ReplyAttr, ReplyData, ReplyDirectory, ReplyEntry, ReplyOpen, ReplyXattr, Request};

pub use libc::{EACCES, EBADF, ENOENT};
#[cfg(not(target_os = "macos"))]
pub use libc::ENODATA;
#[cfg(target_os = "macos")]
pub use libc::ENOATTR;

pub use std::ffi::OsStr;
pub use std::time::UNIX_EPOCH;

pub use super::{EntryInfo, FsAdapter, ROOT_INODE, TTL};
