use std::fs::File;
use std::io::Result as IoResult;
use std::path::Path;

use parking_lot::{Mutex, RwLock};

use crate::block::{Backend, BlockDevice};
use crate::codec::Codec;
use crate::data::{DirEntry, InodeAttr, InodeNum, InodeType};
use crate::err;
use crate::inode::{InodeDataEntry, InodeRecord};
use crate::layout::{Layout, B};
use crate::superblock::Superblock;
use crate::vfs::VfsHooks;

use self::bitmap::Bitmap;

mod bitmap;
mod blockstore;
mod dir;
mod file;
mod inodedata;
mod snapshot;

#[cfg(feature = "inode-cache")]
const ICACHE_SIZE: usize = 256;

/// Summary of filesystem statistics, analogous to `statfs(2)`.
#[derive(Debug, Clone)]
pub struct Info {
    pub blocks: u64,
    pub bfree: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
}

/// The snapshotting copy-on-write block store. Owns the single on-disk
/// backend and everything mount loads into memory from it (superblock,
/// bitmaps); everything else is resolved lazily through `file`.
pub struct Ufs<R: Backend, H: VfsHooks> {
    file: Mutex<Codec<BlockDevice<R>>>,
    layout: Layout,
    superblock: RwLock<Superblock>,
    inode_bitmap: Bitmap,
    block_bitmap: Bitmap,
    inodedata_bitmap: Bitmap,
    /// Reader side taken by every ordinary filesystem operation; writer
    /// side taken by snapshot create/delete/restore. See SPEC_FULL's
    /// "Concurrency re-architecture" design note: this is exactly the
    /// reader/writer lock the spec asks a rewrite to model freeze as.
    freeze: RwLock<()>,
    hooks: Mutex<H>,
    #[cfg(feature = "inode-cache")]
    icache: Mutex<lru::LruCache<InodeNum, InodeRecord>>,
}

impl<H: VfsHooks> Ufs<File, H> {
    pub fn open(path: &Path, rw: bool, hooks: H) -> IoResult<Self> {
        let file = BlockDevice::open(path, rw)?;
        Self::new(file, hooks)
    }

    /// Lays out a fresh image in a file of the given size and opens it.
    /// `n_inodes` is the formatter's inode budget (see [`Layout::compute`]).
    /// This is the primitive the out-of-scope offline image formatter (§1)
    /// would call; nothing bars the library from exposing it directly.
    pub fn format(path: &Path, total_bytes: u64, n_inodes: u32, hooks: H) -> IoResult<Self> {
        {
            let f = File::options().read(true).write(true).create(true).open(path)?;
            f.set_len(total_bytes)?;
        }
        let total_blocks = (total_bytes / B as u64) as u32;
        let device = BlockDevice::open(path, true)?;
        Self::format_device(device, total_blocks, n_inodes, hooks)
    }
}

impl<R: Backend, H: VfsHooks> Ufs<R, H> {
    /// Generic formatter body shared by the on-disk [`Self::format`] (which
    /// `ftruncate`s a real file first) and in-process scenario tests (which
    /// hand in an already-zeroed in-memory backend).
    pub(super) fn format_device(device: BlockDevice<R>, total_blocks: u32, n_inodes: u32, hooks: H) -> IoResult<Self> {
        let layout = Layout::compute(total_blocks, n_inodes)?;
        log::info!("format: {total_blocks} blocks, layout={layout:?}");

        let inode_bitmap = Bitmap::fresh(layout.n_inodes());
        let block_bitmap = Bitmap::fresh(layout.data_blocks());
        let inodedata_bitmap = Bitmap::fresh(layout.n_inodedata());

        let superblock = Superblock::fresh(&layout, inode_bitmap.nr_free(), inodedata_bitmap.nr_free());

        let mut codec = Codec::new(device);
        codec.encode_at(0, &superblock)?;
        codec.write_all_at(layout.if_start() as u64 * B as u64, &inode_bitmap.as_bytes())?;
        codec.write_all_at(layout.bf_start() as u64 * B as u64, &block_bitmap.as_bytes())?;
        codec.write_all_at(layout.idf_start() as u64 * B as u64, &inodedata_bitmap.as_bytes())?;

        let ufs = Ufs {
            file: Mutex::new(codec),
            layout,
            superblock: RwLock::new(superblock),
            inode_bitmap,
            block_bitmap,
            inodedata_bitmap,
            freeze: RwLock::new(()),
            hooks: Mutex::new(hooks),
            #[cfg(feature = "inode-cache")]
            icache: Mutex::new(lru::LruCache::new(std::num::NonZeroUsize::new(ICACHE_SIZE).unwrap())),
        };
        ufs.create_root()?;
        Ok(ufs)
    }
}

impl<R: Backend, H: VfsHooks> Ufs<R, H> {
    pub fn new(file: BlockDevice<R>, hooks: H) -> IoResult<Self> {
        let mut codec = Codec::new(file);
        let superblock: Superblock = codec.decode_at(0)?;
        superblock.check_magic()?;
        let layout = superblock.layout();
        log::debug!("mount: superblock={superblock:#?}");

        let mut raw_inode_bits = vec![0u8; layout.n_if as usize * B as usize];
        codec.read_exact_at(layout.if_start() as u64 * B as u64, &mut raw_inode_bits)?;
        let mut raw_block_bits = vec![0u8; layout.n_bf as usize * B as usize];
        codec.read_exact_at(layout.bf_start() as u64 * B as u64, &mut raw_block_bits)?;
        let mut raw_idata_bits = vec![0u8; layout.n_idf as usize * B as usize];
        codec.read_exact_at(layout.idf_start() as u64 * B as u64, &mut raw_idata_bits)?;

        let s = Ufs {
            file: Mutex::new(codec),
            layout,
            inode_bitmap: Bitmap::from_bytes(raw_inode_bits, layout.n_inodes(), superblock.nr_free_inodes),
            block_bitmap: Bitmap::from_bytes(raw_block_bits, layout.data_blocks(), superblock.nr_free_blocks),
            inodedata_bitmap: Bitmap::from_bytes(raw_idata_bits, layout.n_inodedata(), superblock.nr_free_inodedata),
            superblock: RwLock::new(superblock),
            freeze: RwLock::new(()),
            hooks: Mutex::new(hooks),
            #[cfg(feature = "inode-cache")]
            icache: Mutex::new(lru::LruCache::new(std::num::NonZeroUsize::new(ICACHE_SIZE).unwrap())),
        };
        s.check()?;
        Ok(s)
    }

    /// Validates the magic, the bitmap/superblock free-counter consistency
    /// invariant (P2), and the block-refcount reachability invariant (P1).
    pub fn check(&self) -> IoResult<()> {
        let sb = self.superblock.read();
        sb.check_magic()?;
        if sb.nr_free_inodes != self.inode_bitmap.popcount() {
            log::error!("inode free count mismatch: sb={}, bitmap={}", sb.nr_free_inodes, self.inode_bitmap.popcount());
            return Err(err!(EIO));
        }
        if sb.nr_free_blocks != self.block_bitmap.popcount() {
            log::error!("block free count mismatch: sb={}, bitmap={}", sb.nr_free_blocks, self.block_bitmap.popcount());
            return Err(err!(EIO));
        }
        if sb.nr_free_inodedata != self.inodedata_bitmap.popcount() {
            log::error!(
                "inode-data free count mismatch: sb={}, bitmap={}",
                sb.nr_free_inodedata,
                self.inodedata_bitmap.popcount()
            );
            return Err(err!(EIO));
        }
        drop(sb);
        self.check_block_refcounts()
    }

    /// P1: the sum of every live reachability path to a block must equal
    /// its on-disk refcount. Walks every allocated inode's every live
    /// snapshot slot, tallying one reference per slot for the inode-data's
    /// own `index_block` (matching what `link_inode_data`/`put_inode_data`
    /// add and remove per link), then, once per distinct file index block,
    /// one reference per non-zero entry in its array (matching what
    /// `cow_block` re-credits only when that array is actually duplicated).
    fn check_block_refcounts(&self) -> IoResult<()> {
        use std::collections::{HashMap, HashSet};

        let mut expected: HashMap<u32, u32> = HashMap::new();
        let mut file_index_blocks: HashSet<u32> = HashSet::new();

        for ino_idx in self.inode_bitmap.allocated() {
            let ino = InodeNum::new_checked(ino_idx).ok_or_else(|| err!(EIO))?;
            let rec = self.read_inode_record(ino)?;
            for &idx in rec.i_data.iter() {
                if idx == 0 {
                    continue;
                }
                let entry = self.read_inodedata(idx)?;
                if entry.index_block == 0 {
                    continue;
                }
                *expected.entry(entry.index_block).or_insert(0) += 1;
                if entry.kind() == InodeType::File {
                    file_index_blocks.insert(entry.index_block);
                }
            }
        }

        for b in file_index_blocks {
            for data_b in self.read_index_block(b)? {
                if data_b != 0 {
                    *expected.entry(data_b).or_insert(0) += 1;
                }
            }
        }

        for idx in self.block_bitmap.allocated() {
            let block = self.layout.block_of_index(idx);
            let actual = self.refcount(block)? as u32;
            let want = expected.get(&block).copied().unwrap_or(0);
            if actual != want {
                log::error!(
                    "block {block} refcount mismatch: on-disk={actual}, expected from reachability walk={want}"
                );
                return Err(err!(EIO));
            }
        }

        Ok(())
    }

    pub fn info(&self) -> Info {
        let sb = self.superblock.read();
        Info {
            blocks: sb.total_blocks as u64,
            bfree: self.block_bitmap.nr_free() as u64,
            files: self.layout.n_inodes() as u64,
            ffree: self.inode_bitmap.nr_free() as u64,
            bsize: B,
        }
    }

    pub fn root(&self) -> InodeNum {
        InodeNum::ROOT
    }

    /// Walks `path` component by component via repeated directory lookups.
    /// There is no kernel dentry cache doing this for us in-process.
    pub fn resolve_path(&self, path: &str) -> IoResult<InodeNum> {
        let mut ino = self.root();
        for comp in path.split('/').filter(|c| !c.is_empty()) {
            ino = self.dir_lookup(ino, comp)?;
        }
        Ok(ino)
    }

    pub fn getattr(&self, ino: InodeNum) -> IoResult<InodeAttr> {
        let (_idx, entry) = self.get_inode_data(ino, false, false)?;
        Ok(entry.as_attr(ino))
    }

    fn now(&self) -> (i64, u32) {
        let d = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        (d.as_secs() as i64, d.subsec_nanos())
    }

    fn create_root(&self) -> IoResult<()> {
        let ino = InodeNum::ROOT;
        self.inode_bitmap.alloc()?; // consumes bit 1, matching InodeNum::ROOT
        let block = self.alloc_block()?;
        self.zero_dir_block(block)?;

        let now = self.now();
        let mut entry = InodeDataEntry::new_dir(now);
        entry.index_block = block;
        entry.nlink = 2;

        let idx = self.alloc_fresh_inodedata(ino, entry)?;
        let mut rec = InodeRecord::EMPTY;
        rec.i_data[0] = idx;
        self.write_inode_record(ino, &rec)?;
        self.sync_superblock()?;
        log::info!("formatted root directory at inode {ino}");
        Ok(())
    }

    pub fn kind_of(&self, ino: InodeNum) -> IoResult<InodeType> {
        Ok(self.getattr(ino)?.kind)
    }

    pub fn readdir(&self, dino: InodeNum) -> IoResult<Vec<DirEntry>> {
        let _guard = self.freeze.read();
        self.dir_iter(dino)
    }

    /// Creates a new, empty regular file named `name` in `parent`.
    pub fn create(&self, parent: InodeNum, name: &str) -> IoResult<InodeNum> {
        let _guard = self.freeze.read();
        let (_pidx, pentry) = self.get_inode_data(parent, false, false)?;
        if pentry.kind() != InodeType::Directory {
            return Err(err!(ENOTDIR));
        }

        let ino = InodeNum::new_checked(self.inode_bitmap.alloc()?).ok_or_else(|| err!(EIO))?;
        let now = self.now();
        self.alloc_fresh_inodedata(ino, InodeDataEntry::new_file(now))?;

        if let Err(e) = self.dir_create(parent, name, ino) {
            self.put_inode_data(ino, 0)?;
            return Err(e);
        }
        self.sync_superblock()?;
        log::info!("create({parent}, {name:?}) -> {ino}");
        Ok(ino)
    }

    /// Creates a new, empty subdirectory named `name` in `parent`.
    pub fn mkdir(&self, parent: InodeNum, name: &str) -> IoResult<InodeNum> {
        let _guard = self.freeze.read();
        let (_pidx, pentry) = self.get_inode_data(parent, false, false)?;
        if pentry.kind() != InodeType::Directory {
            return Err(err!(ENOTDIR));
        }

        let ino = InodeNum::new_checked(self.inode_bitmap.alloc()?).ok_or_else(|| err!(EIO))?;
        let block = self.alloc_block()?;
        self.zero_dir_block(block)?;
        let now = self.now();
        let mut entry = InodeDataEntry::new_dir(now);
        entry.index_block = block;
        entry.nlink = 2;
        self.alloc_fresh_inodedata(ino, entry)?;

        if let Err(e) = self.dir_create(parent, name, ino) {
            self.put_inode_data(ino, 0)?;
            return Err(e);
        }
        self.adjust_nlink(parent, 1)?;
        self.sync_superblock()?;
        log::info!("mkdir({parent}, {name:?}) -> {ino}");
        Ok(ino)
    }

    /// Removes a regular file's directory entry and drops its live
    /// inode-data reference.
    pub fn unlink(&self, parent: InodeNum, name: &str) -> IoResult<()> {
        let _guard = self.freeze.read();
        let ino = self.dir_lookup(parent, name)?;
        if self.kind_of(ino)? == InodeType::Directory {
            return Err(err!(EISDIR));
        }
        self.dir_unlink(parent, name)?;
        self.put_inode_data(ino, 0)?;
        self.sync_superblock()?;
        log::info!("unlink({parent}, {name:?}) -> {ino}");
        Ok(())
    }

    /// Removes an empty subdirectory named `name` from `parent`.
    pub fn rmdir(&self, parent: InodeNum, name: &str) -> IoResult<()> {
        let _guard = self.freeze.read();
        let ino = self.dir_lookup(parent, name)?;
        if self.kind_of(ino)? != InodeType::Directory {
            return Err(err!(ENOTDIR));
        }
        if !self.dir_is_empty(ino)? {
            return Err(err!(ENOTEMPTY));
        }
        self.dir_unlink(parent, name)?;
        self.put_inode_data(ino, 0)?;
        self.adjust_nlink(parent, -1)?;
        self.sync_superblock()?;
        log::info!("rmdir({parent}, {name:?}) -> {ino}");
        Ok(())
    }

    /// Moves `old_name` from `old_parent` to `new_name` in `new_parent`,
    /// replacing an existing empty-directory or file target the same way
    /// POSIX `rename(2)` does.
    pub fn rename(&self, old_parent: InodeNum, old_name: &str, new_parent: InodeNum, new_name: &str) -> IoResult<()> {
        let _guard = self.freeze.read();
        let ino = self.dir_lookup(old_parent, old_name)?;
        if old_parent == new_parent && old_name == new_name {
            return Ok(());
        }

        match self.dir_lookup(new_parent, new_name) {
            Ok(existing) => {
                if existing == ino {
                    return Ok(());
                }
                let existing_is_dir = self.kind_of(existing)? == InodeType::Directory;
                let moving_is_dir = self.kind_of(ino)? == InodeType::Directory;
                if moving_is_dir && !existing_is_dir {
                    return Err(err!(ENOTDIR));
                }
                if !moving_is_dir && existing_is_dir {
                    return Err(err!(EISDIR));
                }
                if existing_is_dir && !self.dir_is_empty(existing)? {
                    return Err(err!(ENOTEMPTY));
                }
                self.dir_unlink(new_parent, new_name)?;
                self.put_inode_data(existing, 0)?;
                if existing_is_dir {
                    self.adjust_nlink(new_parent, -1)?;
                }
            }
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => {}
            Err(e) => return Err(e),
        }

        if old_parent == new_parent {
            self.dir_rename_in_place(old_parent, old_name, new_name)?;
        } else {
            self.dir_create(new_parent, new_name, ino)?;
            self.dir_unlink(old_parent, old_name)?;
            if self.kind_of(ino)? == InodeType::Directory {
                self.adjust_nlink(old_parent, -1)?;
                self.adjust_nlink(new_parent, 1)?;
            }
        }
        self.sync_superblock()?;
        log::info!("rename({old_parent}, {old_name:?} -> {new_parent}, {new_name:?})");
        Ok(())
    }

    fn adjust_nlink(&self, dino: InodeNum, delta: i32) -> IoResult<()> {
        let (idx, mut entry) = self.get_inode_data(dino, false, true)?;
        entry.nlink = (entry.nlink as i32 + delta).max(0) as u16;
        self.write_inodedata(idx, &entry)
    }

    /// Keeps the superblock's denormalized free-object counters in step
    /// with the in-memory bitmaps. Called after every mutating operation so
    /// `check()` (and an admin `fsck`-style read) never observes a stale
    /// count.
    fn sync_superblock(&self) -> IoResult<()> {
        let mut sb = self.superblock.write();
        sb.nr_free_inodes = self.inode_bitmap.nr_free();
        sb.nr_free_blocks = self.block_bitmap.nr_free();
        sb.nr_free_inodedata = self.inodedata_bitmap.nr_free();
        self.file.lock().encode_at(0, &*sb)
    }

    /// Reads inode `ino`'s fixed-size table record (the `i_data[0..S_MAX]`
    /// indirection array, not its POSIX metadata — that lives one layer
    /// down in the inode-data store). Served from the inode-cache feature's
    /// LRU when present, since this record is re-read on nearly every
    /// operation that touches `ino`.
    pub(super) fn read_inode_record(&self, ino: InodeNum) -> IoResult<InodeRecord> {
        #[cfg(feature = "inode-cache")]
        if let Some(rec) = self.icache.lock().get(&ino) {
            return Ok(*rec);
        }
        let off = self.layout.inode_offset(ino.get());
        let rec = self.file.lock().decode_at(off)?;
        #[cfg(feature = "inode-cache")]
        self.icache.lock().put(ino, rec);
        Ok(rec)
    }

    pub(super) fn write_inode_record(&self, ino: InodeNum, rec: &InodeRecord) -> IoResult<()> {
        let off = self.layout.inode_offset(ino.get());
        self.file.lock().encode_at(off, rec)?;
        #[cfg(feature = "inode-cache")]
        self.icache.lock().put(ino, *rec);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Cursor;

    use super::Ufs;
    use crate::block::BlockDevice;
    use crate::layout::B;
    use crate::vfs::NoopHooks;

    pub(crate) const TEST_BLOCKS: u32 = (8 * 1024 * 1024) / B;
    pub(crate) const TEST_INODES: u32 = 64;

    /// A freshly formatted, entirely in-memory filesystem for unit tests:
    /// no temp file, no real device, just a zeroed `Vec<u8>` behind a
    /// `Cursor`.
    pub(crate) fn fresh() -> Ufs<Cursor<Vec<u8>>, NoopHooks> {
        let backend = Cursor::new(vec![0u8; (TEST_BLOCKS * B) as usize]);
        let device = BlockDevice::new(backend, true);
        Ufs::format_device(device, TEST_BLOCKS, TEST_INODES, NoopHooks).expect("format")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::fresh;
    use crate::data::InodeType;

    #[test]
    fn fresh_image_has_an_empty_root() {
        let fs = fresh();
        assert!(fs.readdir(fs.root()).unwrap().is_empty());
        assert_eq!(fs.kind_of(fs.root()).unwrap(), InodeType::Directory);
    }

    #[test]
    fn mkdir_then_rmdir_round_trips() {
        let fs = fresh();
        let root = fs.root();
        let d = fs.mkdir(root, "sub").unwrap();
        assert_eq!(fs.kind_of(d).unwrap(), InodeType::Directory);
        assert!(fs.dir_is_empty(d).unwrap());
        fs.rmdir(root, "sub").unwrap();
        assert!(fs.dir_lookup(root, "sub").is_err());
    }

    #[test]
    fn rmdir_of_a_nonempty_directory_fails() {
        let fs = fresh();
        let root = fs.root();
        let d = fs.mkdir(root, "sub").unwrap();
        fs.create(d, "f").unwrap();
        assert_eq!(fs.rmdir(root, "sub").unwrap_err().raw_os_error(), Some(libc::ENOTEMPTY));
    }

    #[test]
    fn rename_moves_across_directories() {
        let fs = fresh();
        let root = fs.root();
        let a = fs.mkdir(root, "a").unwrap();
        let b = fs.mkdir(root, "b").unwrap();
        let f = fs.create(a, "file").unwrap();
        fs.rename(a, "file", b, "file").unwrap();
        assert!(fs.dir_lookup(a, "file").is_err());
        assert_eq!(fs.dir_lookup(b, "file").unwrap(), f);
    }

    #[test]
    fn rename_onto_an_existing_file_replaces_it() {
        let fs = fresh();
        let root = fs.root();
        let src = fs.create(root, "src").unwrap();
        fs.write(src, 0, b"new").unwrap();
        let dst = fs.create(root, "dst").unwrap();
        fs.write(dst, 0, b"old").unwrap();
        fs.rename(root, "src", root, "dst").unwrap();
        assert_eq!(fs.dir_lookup(root, "dst").unwrap(), src);
        assert!(fs.dir_lookup(root, "src").is_err());
    }

    #[test]
    fn format_leaves_superblock_counters_consistent() {
        let fs = fresh();
        fs.check().unwrap();
        fs.create(fs.root(), "a").unwrap();
        fs.check().unwrap();
    }
}

pub(crate) use crate::data::BlockKind;
