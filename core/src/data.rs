//! Shared value types used across the core: inode identity, snapshot
//! identity, directory-entry records and the block-kind tag that drives
//! `put_block`/`cow_block` dispatch.

use std::fmt;
use std::num::NonZeroU32;

use bincode::{Decode, Encode};

use crate::layout::DIR_NAME_LEN;

/// A stable inode identifier. `0` never names a real inode (it is the
/// bitmap's "no-such-object" sentinel), so this is a `NonZeroU32` the same
/// way the teacher's `InodeNum` wraps a non-zero value: constructing one is
/// `unsafe` because the caller is asserting the value came from a bitmap
/// scan or an on-disk record that already excludes zero, not re-deriving
/// that proof at every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InodeNum(NonZeroU32);

impl InodeNum {
    pub const ROOT: InodeNum = InodeNum(NonZeroU32::new(1).unwrap());

    /// # Safety
    /// Callers must guarantee `n != 0`.
    pub unsafe fn new(n: u32) -> Self {
        InodeNum(NonZeroU32::new_unchecked(n))
    }

    pub fn new_checked(n: u32) -> Option<Self> {
        NonZeroU32::new(n).map(InodeNum)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    pub fn get64(self) -> u64 {
        self.0.get() as u64
    }
}

impl fmt::Display for InodeNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

/// A snapshot table slot index, `0..S_MAX`. Slot 0 is always the live
/// snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotSlot(pub u8);

impl SnapshotSlot {
    pub const LIVE: SnapshotSlot = SnapshotSlot(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SnapshotSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persisted snapshot identifier. `0` means "no snapshot" / "the live
/// state", never a real snapshot's id.
pub type SnapshotId = u32;

/// Kind tag for a refcounted data block; `put_block`/`cow_block` dispatch
/// on it instead of on distinct owning types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Raw file content; leaf, no recursive put.
    Data,
    /// A file index block: an array of data-block numbers.
    Index,
    /// A directory block: names only, no recursive put (see SPEC_FULL §4).
    Dir,
    /// A block holding inode-data entries.
    InodeData,
}

/// Kind of filesystem object an inode names; carried in the inode-data
/// entry's `mode` field the same way POSIX overloads the mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeType {
    File,
    Directory,
}

/// In-memory view of an inode's attributes, assembled from an inode-data
/// entry for presentation to callers (the `stat`-style accessor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeAttr {
    pub ino: InodeNum,
    pub kind: InodeType,
    pub size: u64,
    pub blocks: u64,
    pub nlink: u16,
    pub atime: (i64, u32),
    pub mtime: (i64, u32),
    pub ctime: (i64, u32),
}

/// On-disk directory entry: fixed 28-byte name field, zero-padded, and an
/// inode number where `0` marks the end of the in-use prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Decode, Encode)]
pub struct DirEntryRaw {
    pub inode: u32,
    pub name: [u8; DIR_NAME_LEN],
}

impl DirEntryRaw {
    pub const EMPTY: DirEntryRaw = DirEntryRaw {
        inode: 0,
        name: [0; DIR_NAME_LEN],
    };

    pub fn encode_name(name: &str) -> std::io::Result<[u8; DIR_NAME_LEN]> {
        let bytes = name.as_bytes();
        if bytes.len() >= DIR_NAME_LEN {
            return Err(crate::err!(ENAMETOOLONG));
        }
        let mut buf = [0u8; DIR_NAME_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(buf)
    }

    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..len]).unwrap_or("")
    }
}

/// A resolved directory entry handed back by the read-only accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub ino: InodeNum,
}
