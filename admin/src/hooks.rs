//! A standalone process has no kernel page cache, dentry cache, or inode
//! cache of its own — there is nothing to freeze, invalidate, or evict.
//! Every [`VfsHooks`] method is either a no-op or a log line, the same
//! stance the teacher's own `NoopHooks` test double takes, just promoted
//! to a real (non-test) type for `ouifs-admin` to hand to [`Ufs::open`].

use ouifs_core::{InodeNum, VfsHooks};

#[derive(Default)]
pub struct StandaloneHooks;

impl VfsHooks for StandaloneHooks {
    fn freeze_fs(&mut self) -> std::io::Result<()> {
        log::debug!("freeze: no host cache to quiesce");
        Ok(())
    }

    fn thaw_fs(&mut self) -> std::io::Result<()> {
        log::debug!("thaw: resuming");
        Ok(())
    }

    fn foreach_cached_inode(&mut self, _f: &mut dyn FnMut(InodeNum)) {}

    fn invalidate_page_cache(&mut self, _ino: InodeNum) {}

    fn refill_inode_metadata(&mut self, _ino: InodeNum) {}

    fn shrink_dentry_cache(&mut self) {}

    fn evict_unused_inodes(&mut self) {}
}
