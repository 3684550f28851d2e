//! On-disk superblock: magic, region sizes, free-object counts, and the
//! embedded snapshot table.

use bincode::{Decode, Encode};

use crate::data::SnapshotId;
use crate::err;
use crate::layout::{Layout, B, MAGIC, S_MAX};

/// `(created_seconds, id)`. `id == 0` means the slot is empty. Lives only
/// in the superblock, never as a standalone on-disk entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Decode, Encode)]
pub struct SnapshotDescriptor {
    pub created: i64,
    pub id: SnapshotId,
}

impl SnapshotDescriptor {
    pub const EMPTY: SnapshotDescriptor = SnapshotDescriptor { created: 0, id: 0 };

    pub fn is_empty(&self) -> bool {
        self.id == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Decode, Encode)]
pub struct Superblock {
    pub magic: u32,
    pub total_blocks: u32,
    pub n_is: u32,
    pub n_if: u32,
    pub n_bf: u32,
    pub n_idf: u32,
    pub n_idx: u32,
    pub n_meta: u32,
    pub nr_free_inodes: u32,
    pub nr_free_blocks: u32,
    pub nr_free_inodedata: u32,
    pub snapshots: [SnapshotDescriptor; S_MAX],
}

impl Superblock {
    pub fn fresh(layout: &Layout, n_free_inodes: u32, n_free_inodedata: u32) -> Self {
        let mut snapshots = [SnapshotDescriptor::EMPTY; S_MAX];
        snapshots[0] = SnapshotDescriptor { created: 0, id: 0 };
        Superblock {
            magic: MAGIC,
            total_blocks: layout.total_blocks,
            n_is: layout.n_is,
            n_if: layout.n_if,
            n_bf: layout.n_bf,
            n_idf: layout.n_idf,
            n_idx: layout.n_idx,
            n_meta: layout.n_meta,
            nr_free_inodes: n_free_inodes,
            nr_free_blocks: layout.data_blocks(),
            nr_free_inodedata: n_free_inodedata,
            snapshots,
        }
    }

    pub fn check_magic(&self) -> std::io::Result<()> {
        if self.magic != MAGIC {
            log::error!("bad magic: {:#x}", self.magic);
            return Err(err!(EINVAL));
        }
        Ok(())
    }

    pub fn layout(&self) -> Layout {
        Layout {
            total_blocks: self.total_blocks,
            n_is: self.n_is,
            n_if: self.n_if,
            n_bf: self.n_bf,
            n_idf: self.n_idf,
            n_idx: self.n_idx,
            n_meta: self.n_meta,
        }
    }

    /// Finds the lowest slot `k` in `[1, S_MAX)` holding `id`. Returns
    /// `None` if not present; `id == 0` never matches (slot 0 is not a
    /// real snapshot).
    pub fn find_slot(&self, id: SnapshotId) -> Option<usize> {
        if id == 0 {
            return None;
        }
        self.snapshots[1..].iter().position(|d| d.id == id).map(|i| i + 1)
    }

    /// Finds the lowest empty slot in `[1, S_MAX)`.
    pub fn find_free_slot(&self) -> Option<usize> {
        self.snapshots[1..].iter().position(SnapshotDescriptor::is_empty).map(|i| i + 1)
    }

    /// Smallest positive id not currently present in the table.
    pub fn next_free_id(&self) -> SnapshotId {
        let mut id = 1;
        loop {
            if self.snapshots[1..].iter().all(|d| d.id != id) {
                return id;
            }
            id += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Layout {
        Layout::compute(50 * 1024 * 1024 / B, 4096).unwrap()
    }

    #[test]
    fn fresh_superblock_has_live_slot_zero_only() {
        let sb = Superblock::fresh(&layout(), 4096, 4096);
        assert_eq!(sb.snapshots[0].id, 0);
        assert!(sb.find_slot(0).is_none());
        assert_eq!(sb.find_free_slot(), Some(1));
        assert_eq!(sb.next_free_id(), 1);
    }

    #[test]
    fn next_free_id_skips_occupied_slots() {
        let mut sb = Superblock::fresh(&layout(), 4096, 4096);
        sb.snapshots[1] = SnapshotDescriptor { created: 1, id: 1 };
        sb.snapshots[2] = SnapshotDescriptor { created: 2, id: 2 };
        assert_eq!(sb.next_free_id(), 3);
        assert_eq!(sb.find_slot(2), Some(2));
        assert_eq!(sb.find_free_slot(), Some(3));
    }
}
