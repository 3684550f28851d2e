//! The inode-data store: §4.3. An inode-data entry is addressed by a dense
//! 32-bit index drawn from its own free bitmap; the inode-data index table
//! resolves that index to the data block holding it. This is the second
//! level of copy-on-write the design calls for — sharing unchanged inode
//! *metadata* between snapshots the same way `blockstore` shares unchanged
//! *content*.
//!
//! New relative to the teacher (UFS has no per-inode-data CoW or
//! snapshotting at all); built in the teacher's idiom of one dense-index-
//! over-index-blocks resolution, generalized from `ufs/inode.rs`'s
//! 12-direct-plus-indirect-block resolution down to a flat `idx -> (block,
//! slot)` mapping, since inode-data entries never grow past one generation.

use std::io::Result as IoResult;

use super::{Backend, Ufs};
use crate::data::{BlockKind, InodeNum, InodeType};
use crate::err;
use crate::inode::InodeDataEntry;
use crate::layout::{Layout, INODE_DATA_PER_BLOCK};
use crate::vfs::VfsHooks;

impl<R: Backend, H: VfsHooks> Ufs<R, H> {
    /// Resolves inode-data index `idx`'s group to its backing data block,
    /// allocating one if this is the first entry drawn from that group.
    fn ensure_inodedata_block(&self, idx: u32) -> IoResult<u32> {
        let off = self.layout.inodedata_index_entry_offset(idx);
        let mut buf = [0u8; 4];
        self.file.lock().read_exact_at(off, &mut buf)?;
        let mut block = u32::from_le_bytes(buf);
        if block == 0 {
            block = self.alloc_block()?;
            self.file.lock().write_all_at(off, &block.to_le_bytes())?;
            log::trace!("inodedata: group for idx {idx} backed by new block {block}");
        }
        Ok(block)
    }

    fn inodedata_block_of(&self, idx: u32) -> IoResult<u32> {
        let off = self.layout.inodedata_index_entry_offset(idx);
        let mut buf = [0u8; 4];
        self.file.lock().read_exact_at(off, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn clear_inodedata_index_entry(&self, idx: u32) -> IoResult<()> {
        let off = self.layout.inodedata_index_entry_offset(idx);
        self.file.lock().write_all_at(off, &0u32.to_le_bytes())
    }

    fn inodedata_offset(&self, idx: u32) -> IoResult<u64> {
        let block = self.inodedata_block_of(idx)?;
        if block == 0 {
            log::error!("inodedata_offset({idx}): entry has no backing block");
            return Err(err!(EIO));
        }
        Ok(self.layout.byte_offset(block) + Layout::inodedata_slot_offset(idx) as u64)
    }

    pub(super) fn read_inodedata(&self, idx: u32) -> IoResult<InodeDataEntry> {
        let off = self.inodedata_offset(idx)?;
        self.file.lock().decode_at(off)
    }

    pub(super) fn write_inodedata(&self, idx: u32, entry: &InodeDataEntry) -> IoResult<()> {
        let off = self.inodedata_offset(idx)?;
        self.file.lock().encode_at(off, entry)
    }

    /// True iff every entry in `idx`'s hosting block is free. Index 0's
    /// group will never report empty: index 0 is the bitmap's permanent
    /// "no-such-object" sentinel, not a real entry.
    fn inodedata_block_is_empty(&self, idx: u32) -> bool {
        let group = idx / INODE_DATA_PER_BLOCK;
        let base = group * INODE_DATA_PER_BLOCK;
        (base..base + INODE_DATA_PER_BLOCK).all(|i| self.inodedata_bitmap.is_free(i))
    }

    /// Draws a fresh inode-data index, writes `entry` (refcount forced to
    /// 1) into it, and points `ino`'s live slot (`i_data[0]`) at it.
    pub(super) fn alloc_fresh_inodedata(&self, ino: InodeNum, mut entry: InodeDataEntry) -> IoResult<u32> {
        entry.refcount = 1;
        let idx = self.inodedata_bitmap.alloc()?;
        self.ensure_inodedata_block(idx)?;
        self.write_inodedata(idx, &entry)?;

        let mut rec = self.read_inode_record(ino)?;
        rec.i_data[0] = idx;
        self.write_inode_record(ino, &rec)?;
        log::trace!("alloc_fresh_inodedata({ino}): idx={idx}");
        Ok(idx)
    }

    /// §4.3 `get_inode_data`. Resolves `ino`'s live inode-data entry,
    /// optionally CoW'ing it first if it is shared with another snapshot.
    pub(super) fn get_inode_data(&self, ino: InodeNum, allocate: bool, cow: bool) -> IoResult<(u32, InodeDataEntry)> {
        let rec = self.read_inode_record(ino)?;
        let idx0 = rec.i_data[0];

        if allocate {
            // Only reached via the CoW recursion below: there is always an
            // existing entry to branch a private copy off of. The new
            // entry starts as a copy of the old one's metadata (lifecycle
            // note in §4.3: inode-data is "copied when CoW is triggered");
            // since it now also names `index_block`, that block gains a
            // second independent owner and must be credited accordingly,
            // exactly like `link_inode_data` does for an explicit share.
            if idx0 == 0 {
                log::error!("get_inode_data({ino}): allocate requested with no existing entry to copy");
                return Err(err!(EIO));
            }
            let mut entry = self.read_inodedata(idx0)?;
            entry.refcount = 1;
            self.get_block(entry.index_block)?;
            let idx = self.alloc_fresh_inodedata(ino, entry)?;
            return Ok((idx, entry));
        }

        if idx0 == 0 {
            log::trace!("get_inode_data({ino}): no live inode-data");
            return Err(err!(ENOENT));
        }

        let mut entry = self.read_inodedata(idx0)?;
        if entry.refcount == 0 {
            log::error!("get_inode_data({ino}): idx {idx0} has refcount 0, invariant violated");
            return Err(err!(EIO));
        }

        if cow && entry.refcount > 1 {
            entry.refcount -= 1;
            self.write_inodedata(idx0, &entry)?;
            // The old entry keeps pointing at the same index_block, but
            // slot 0 no longer reaches it through idx0: one reachability
            // path is gone. The allocate branch below immediately re-adds
            // one via get_block for the new copy, so this must net out
            // against it rather than be skipped.
            let kind = match entry.kind() {
                InodeType::Directory => BlockKind::Dir,
                InodeType::File => BlockKind::Index,
            };
            self.put_block(entry.index_block, kind)?;
            log::trace!("get_inode_data({ino}): CoW inode-data {idx0}, old refcount now {}", entry.refcount);
            return self.get_inode_data(ino, true, true);
        }

        Ok((idx0, entry))
    }

    /// §4.3 `link_inode_data`: shares `from`'s inode-data (and, through it,
    /// its `index_block`) into slot `to`. Used by snapshot create
    /// (`from=0, to=k`) and restore (`from=k, to=0`).
    pub(super) fn link_inode_data(&self, ino: InodeNum, from: usize, to: usize) -> IoResult<()> {
        let mut rec = self.read_inode_record(ino)?;
        let idx = rec.i_data[from];
        if idx == 0 {
            rec.i_data[to] = 0;
            self.write_inode_record(ino, &rec)?;
            return Ok(());
        }

        let mut entry = self.read_inodedata(idx)?;
        entry.refcount = entry.refcount.checked_add(1).ok_or_else(|| {
            log::error!("link_inode_data({ino}): inode-data {idx} refcount overflow");
            err!(EIO)
        })?;
        self.write_inodedata(idx, &entry)?;
        self.get_block(entry.index_block)?;

        rec.i_data[to] = idx;
        self.write_inode_record(ino, &rec)?;
        log::trace!("link_inode_data({ino}, {from}->{to}): idx={idx}, refcount={}", entry.refcount);
        Ok(())
    }

    /// §4.3 `put_inode_data`: drops `ino`'s reference from slot `snap`.
    /// When the entry's refcount reaches zero this also releases what it
    /// pointed at (the invariant-coupling note in §4.3: "any change that
    /// increases inode-data sharing also increases its `index_block`
    /// refcount; any delete decreases it") and, if the inode is now dead in
    /// every slot, frees the inode number itself.
    pub(super) fn put_inode_data(&self, ino: InodeNum, snap: usize) -> IoResult<()> {
        let mut rec = self.read_inode_record(ino)?;
        let idx = rec.i_data[snap];
        if idx == 0 {
            return Ok(());
        }
        rec.i_data[snap] = 0;
        self.write_inode_record(ino, &rec)?;

        let mut entry = self.read_inodedata(idx)?;
        if entry.refcount == 0 {
            log::error!("put_inode_data({ino}, {snap}): idx {idx} already at refcount 0");
            return Err(err!(EIO));
        }
        let old_rc = entry.refcount;
        entry.refcount -= 1;
        log::trace!("put_inode_data({ino}, {snap}): idx={idx}, refcount {old_rc} -> {}", entry.refcount);

        let kind = match entry.kind() {
            InodeType::Directory => BlockKind::Dir,
            InodeType::File => BlockKind::Index,
        };
        // Mirrors link_inode_data's per-link get_block: this slot stops
        // being a reachability path to index_block regardless of whether
        // the entry itself survives the decrement.
        self.put_block(entry.index_block, kind)?;

        if entry.refcount > 0 {
            self.write_inodedata(idx, &entry)?;
        } else {
            self.write_inodedata(idx, &InodeDataEntry::ZERO)?;
            self.inodedata_bitmap.free(idx);

            if self.inodedata_block_is_empty(idx) {
                let block = self.inodedata_block_of(idx)?;
                self.put_block(block, BlockKind::InodeData)?;
                self.clear_inodedata_index_entry(idx)?;
            }
        }

        if self.read_inode_record(ino)?.is_dead() {
            self.inode_bitmap.free(ino.get());
            log::info!("put_inode_data({ino}, {snap}): inode is dead in every slot, freed");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::ufs::test_support::fresh;
    use crate::InodeNum;

    #[test]
    fn get_inode_data_resolves_the_live_slot() {
        let fs = fresh();
        let root = InodeNum::ROOT;
        let (_idx, entry) = fs.get_inode_data(root, false, false).unwrap();
        assert_eq!(entry.refcount, 1);
    }

    #[test]
    fn link_inode_data_shares_and_increments_refcount() {
        let fs = fresh();
        let root = InodeNum::ROOT;
        fs.link_inode_data(root, 0, 1).unwrap();
        let (idx0, e0) = fs.get_inode_data(root, false, false).unwrap();
        let rec = fs.read_inode_record(root).unwrap();
        assert_eq!(rec.i_data[1], idx0);
        assert_eq!(e0.refcount, 2);
    }

    #[test]
    fn put_inode_data_on_the_only_slot_frees_the_inode() {
        let fs = fresh();
        let root = InodeNum::ROOT;
        fs.link_inode_data(root, 0, 1).unwrap();
        fs.put_inode_data(root, 0).unwrap();
        fs.put_inode_data(root, 1).unwrap();
        let rec = fs.read_inode_record(root).unwrap();
        assert!(rec.is_dead());
    }

    /// Linking a second slot onto the root directory's inode-data must bump
    /// its index_block's refcount by exactly one, and dropping that slot
    /// again must bring it back down by exactly one, leaving the block at
    /// whatever refcount it started with.
    #[test]
    fn link_then_put_leaves_index_block_refcount_unchanged() {
        let fs = fresh();
        let root = InodeNum::ROOT;
        let (_idx, entry) = fs.get_inode_data(root, false, false).unwrap();
        let before = fs.refcount(entry.index_block).unwrap();

        fs.link_inode_data(root, 0, 1).unwrap();
        assert_eq!(fs.refcount(entry.index_block).unwrap(), before + 1);

        fs.put_inode_data(root, 1).unwrap();
        assert_eq!(fs.refcount(entry.index_block).unwrap(), before);
    }
}
