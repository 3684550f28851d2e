//! On-disk inode record and inode-data entry.
//!
//! The inode record itself carries no POSIX metadata at all — only the
//! per-slot indirection into the inode-data store (see
//! [`crate::ufs::inodedata`]). This is the "inode identity vs inode-data
//! identity" split the design notes call out: conflating the two is the
//! bug class this split exists to rule out.

use bincode::{Decode, Encode};

use crate::data::{InodeAttr, InodeNum, InodeType};
use crate::layout::S_MAX;

pub const S_IFMT: u16 = 0xf000;
pub const S_IFREG: u16 = 0x8000;
pub const S_IFDIR: u16 = 0x4000;

/// Fixed-size inode table record: `i_data[k] == 0` means this inode does
/// not exist in snapshot slot `k`. An inode is dead iff every slot is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Decode, Encode)]
pub struct InodeRecord {
    pub i_data: [u32; S_MAX],
}

impl InodeRecord {
    pub const EMPTY: InodeRecord = InodeRecord { i_data: [0; S_MAX] };

    pub fn is_dead(&self) -> bool {
        self.i_data.iter().all(|&x| x == 0)
    }
}

/// The 80-byte POSIX-style metadata record an inode-data index slot
/// resolves to. `spare` keeps the record's size fixed at 80 bytes the way
/// the teacher's on-disk structs carry unused reserved fields rather than
/// ever reshaping a record in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Decode, Encode)]
pub struct InodeDataEntry {
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blocks: u64,
    pub atime_sec: i64,
    pub atime_nsec: u32,
    pub mtime_sec: i64,
    pub mtime_nsec: u32,
    pub ctime_sec: i64,
    pub ctime_nsec: u32,
    pub nlink: u16,
    pub index_block: u32,
    pub refcount: u8,
    pub spare: [u8; 10],
}

impl InodeDataEntry {
    pub const ZERO: InodeDataEntry = InodeDataEntry {
        mode: 0,
        uid: 0,
        gid: 0,
        size: 0,
        blocks: 0,
        atime_sec: 0,
        atime_nsec: 0,
        mtime_sec: 0,
        mtime_nsec: 0,
        ctime_sec: 0,
        ctime_nsec: 0,
        nlink: 0,
        index_block: 0,
        refcount: 0,
        spare: [0; 10],
    };

    pub fn new_file(now: (i64, u32)) -> Self {
        Self::new(S_IFREG, now)
    }

    pub fn new_dir(now: (i64, u32)) -> Self {
        Self::new(S_IFDIR, now)
    }

    fn new(mode: u16, now: (i64, u32)) -> Self {
        InodeDataEntry {
            mode,
            uid: 0,
            gid: 0,
            size: 0,
            blocks: 0,
            atime_sec: now.0,
            atime_nsec: now.1,
            mtime_sec: now.0,
            mtime_nsec: now.1,
            ctime_sec: now.0,
            ctime_nsec: now.1,
            nlink: 1,
            index_block: 0,
            refcount: 1,
            spare: [0; 10],
        }
    }

    pub fn kind(&self) -> InodeType {
        match self.mode & S_IFMT {
            S_IFDIR => InodeType::Directory,
            _ => InodeType::File,
        }
    }

    pub fn as_attr(&self, ino: InodeNum) -> InodeAttr {
        InodeAttr {
            ino,
            kind: self.kind(),
            size: self.size,
            blocks: self.blocks,
            nlink: self.nlink,
            atime: (self.atime_sec, self.atime_nsec),
            mtime: (self.mtime_sec, self.mtime_nsec),
            ctime: (self.ctime_sec, self.ctime_nsec),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_fresh_record_is_dead() {
        assert!(InodeRecord::EMPTY.is_dead());
    }

    #[test]
    fn a_record_with_any_live_slot_is_not_dead() {
        let mut r = InodeRecord::EMPTY;
        r.i_data[3] = 7;
        assert!(!r.is_dead());
    }

    #[test]
    fn new_file_has_refcount_one_and_no_blocks() {
        let e = InodeDataEntry::new_file((0, 0));
        assert_eq!(e.refcount, 1);
        assert_eq!(e.index_block, 0);
        assert_eq!(e.kind(), InodeType::File);
    }
}
