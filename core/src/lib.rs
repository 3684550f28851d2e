//! `ouifs-core`: the on-disk snapshotting copy-on-write block store.
//!
//! Layers bottom-up, mirroring the component stack of the design this crate
//! implements: [`block`] (buffered block I/O), [`codec`] (record encode/
//! decode), [`layout`] (region geometry), [`data`]/[`inode`]/[`superblock`]
//! (on-disk record shapes), [`ufs`] (the bitmap allocator, refcounted block
//! store, inode-data store, directory/file index layer and snapshot
//! manager, all behind the top-level [`Ufs`] handle), and [`vfs`] (the host
//! adapter contract the core consumes rather than implements).

mod block;
mod codec;
mod data;
mod error;
mod inode;
mod layout;
mod superblock;
mod ufs;
mod vfs;

/// (INTERNAL) Constructs an [`std::io::Error`] from an `errno`.
#[macro_export]
macro_rules! err {
    ($name:ident) => {
        ::std::io::Error::from_raw_os_error(::libc::$name)
    };
}

pub use crate::{
    block::BlockDevice,
    data::{BlockKind, DirEntry, InodeAttr, InodeNum, InodeType, SnapshotId, SnapshotSlot},
    error::FsError,
    layout::{B, MAX_FILE_SIZE, S_MAX},
    superblock::SnapshotDescriptor,
    ufs::{Info, Ufs},
    vfs::VfsHooks,
};
