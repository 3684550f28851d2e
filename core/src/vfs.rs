//! The host VFS adapter contract the core consumes as an external
//! collaborator (inode cache, dentry cache, page cache, file-descriptor
//! layer all live on the other side of this trait).
//!
//! Grounded on `native-fuse`'s `Filesystem` trait: the teacher already
//! abstracts over "whatever embeds this core" (a FUSE2 or FUSE3 frontend)
//! behind a plain trait; the same seam works for abstracting over whatever
//! kernel (or, in `admin`, in-process stand-in) owns the caches that
//! snapshot create/restore must invalidate.

use crate::data::InodeNum;

/// Implemented by whatever embeds [`crate::ufs::Ufs`]. A standalone
/// process with no kernel caches of its own (see `admin::hooks`) can
/// implement every method as a no-op or a log line.
pub trait VfsHooks {
    /// Stops new writes and blocks until every dirty page and inode is
    /// written out. Must not return until the freeze is fully in effect;
    /// the snapshot manager relies on this as its linearization point.
    fn freeze_fs(&mut self) -> std::io::Result<()>;

    /// Resumes accepting writes after a matching `freeze_fs`.
    fn thaw_fs(&mut self) -> std::io::Result<()>;

    /// Invokes `f` on every currently cached inode while the adapter's own
    /// inode-list lock is held. Used during snapshot create/restore to
    /// enumerate in-memory inodes without re-deriving them from disk.
    fn foreach_cached_inode(&mut self, f: &mut dyn FnMut(InodeNum));

    /// Drops cached pages for `ino`; called after restore so that stale
    /// content is never served from a page cache that outlived its block.
    fn invalidate_page_cache(&mut self, ino: InodeNum);

    /// Re-reads `ino`'s metadata from the now-live snapshot slot.
    fn refill_inode_metadata(&mut self, ino: InodeNum);

    /// Drops cached directory entries; called after restore since parent
    /// → child name mappings may have changed underneath.
    fn shrink_dentry_cache(&mut self);

    /// Releases any cached inode with no outstanding references.
    fn evict_unused_inodes(&mut self);
}

/// A `VfsHooks` that does nothing, for scenario tests that drive the core
/// directly with no embedding frontend to notify.
#[cfg(test)]
pub(crate) struct NoopHooks;

#[cfg(test)]
impl VfsHooks for NoopHooks {
    fn freeze_fs(&mut self) -> std::io::Result<()> {
        Ok(())
    }
    fn thaw_fs(&mut self) -> std::io::Result<()> {
        Ok(())
    }
    fn foreach_cached_inode(&mut self, _f: &mut dyn FnMut(InodeNum)) {}
    fn invalidate_page_cache(&mut self, _ino: InodeNum) {}
    fn refill_inode_metadata(&mut self, _ino: InodeNum) {}
    fn shrink_dentry_cache(&mut self) {}
    fn evict_unused_inodes(&mut self) {}
}
