//! Block-level abstraction layer: maps random-access reads and writes onto
//! fixed 4 KiB block operations over any `Read + Write + Seek` backend.
//!
//! Grounded on the teacher's `BlockReader<T>`; the block size here is the
//! spec's fixed `B = 4096` rather than the backing file's `st_blksize`.

use std::{
    fs::File,
    io::{self, BufRead, Read, Result as IoResult, Seek, SeekFrom, Write},
    path::Path,
};

use crate::layout::B;

pub trait Backend: Read + Write + Seek {}
impl<T: Read + Write + Seek> Backend for T {}

pub struct BlockDevice<T: Backend> {
    inner: T,
    block: Vec<u8>,
    idx: usize,
    dirty: bool,
    rw: bool,
    #[cfg(feature = "block-cache")]
    cache: lru::LruCache<u64, Vec<u8>>,
}

#[cfg(feature = "block-cache")]
const BLOCK_CACHE_SIZE: usize = 64;

impl BlockDevice<File> {
    pub fn open(path: &Path, rw: bool) -> IoResult<Self> {
        let file = File::options().read(true).write(rw).open(path)?;
        Ok(BlockDevice::new(file, rw))
    }
}

impl<T: Backend> BlockDevice<T> {
    pub fn new(inner: T, rw: bool) -> Self {
        let bs = B as usize;
        Self {
            inner,
            block: vec![0u8; bs],
            idx: bs,
            dirty: false,
            rw,
            #[cfg(feature = "block-cache")]
            cache: lru::LruCache::new(std::num::NonZeroUsize::new(BLOCK_CACHE_SIZE).unwrap()),
        }
    }

    pub fn write_enabled(&self) -> bool {
        self.rw
    }

    fn refill(&mut self) -> IoResult<()> {
        if self.dirty {
            panic!("Cannot refill a dirty BlockDevice");
        }

        #[cfg(feature = "block-cache")]
        let pos = self.inner.stream_position()?;
        #[cfg(feature = "block-cache")]
        if let Some(cached) = self.cache.get(&pos) {
            self.block.copy_from_slice(cached);
            self.inner.seek(SeekFrom::Current(self.block.len() as i64))?;
            self.idx = 0;
            return Ok(());
        }

        self.block.fill(0u8);
        let mut num = 0;
        while num < self.block.len() {
            match self.inner.read(&mut self.block[num..])? {
                0 => break,
                n => num += n,
            }
        }
        if num < self.block.len() {
            log::warn!("BlockDevice::refill(): short read num={num}, treating the rest as zero");
        }
        #[cfg(feature = "block-cache")]
        self.cache.put(pos, self.block.clone());
        self.idx = 0;
        Ok(())
    }

    fn buffered(&self) -> usize {
        self.block.len() - self.idx
    }

    fn refill_if_empty(&mut self) -> IoResult<()> {
        if self.buffered() == 0 {
            self.refill()?;
        }
        Ok(())
    }

    pub fn blksize(&self) -> usize {
        self.block.len()
    }
}

impl<T: Backend> Read for BlockDevice<T> {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        self.refill_if_empty()?;
        let num = buf.len().min(self.buffered());
        let buf = &mut buf[0..num];
        buf.copy_from_slice(&self.block[self.idx..(self.idx + num)]);
        self.idx += num;
        Ok(num)
    }
}

impl<T: Backend> Write for BlockDevice<T> {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        if !self.rw {
            panic!("BUG: BlockDevice::write() called on a read-only device");
        }
        self.refill_if_empty()?;
        let num = buf.len().min(self.buffered());
        self.block[self.idx..(self.idx + num)].copy_from_slice(&buf[0..num]);
        self.idx += num;
        self.dirty = true;
        self.flush()?;
        Ok(num)
    }

    fn flush(&mut self) -> IoResult<()> {
        if !self.dirty {
            return Ok(());
        }

        #[allow(unused_variables)]
        let pos = self
            .inner
            .seek(SeekFrom::Current(-(self.block.len() as i64)))?;

        #[cfg(feature = "block-cache")]
        self.cache.put(pos, self.block.clone());

        let mut num = 0;
        while num < self.block.len() {
            match self.inner.write(&self.block[num..])? {
                0 => break,
                n => num += n,
            }
        }
        if num < self.block.len() {
            log::error!("BlockDevice: short write num={num}, len={}", self.block.len());
        }
        self.dirty = false;
        Ok(())
    }
}

impl<T: Backend> BufRead for BlockDevice<T> {
    fn fill_buf(&mut self) -> IoResult<&[u8]> {
        self.refill_if_empty()?;
        Ok(&self.block[self.idx..])
    }

    fn consume(&mut self, amt: usize) {
        assert!(amt <= self.buffered());
        self.idx += amt;
    }
}

impl<T: Backend> Seek for BlockDevice<T> {
    fn seek(&mut self, pos: SeekFrom) -> IoResult<u64> {
        let bs = self.blksize() as u64;
        match pos {
            SeekFrom::Start(pos) => {
                self.flush()?;
                let real = self.inner.seek(SeekFrom::Start(pos / bs * bs))?;
                let rem = pos - real;
                assert!(rem < bs);

                self.refill()?;
                self.idx = rem as usize;

                Ok(real + rem)
            }
            SeekFrom::Current(offset) => {
                let real = self.inner.stream_position()?;
                let cur = real - self.block.len() as u64 + self.idx as u64;
                let newidx = offset + self.idx as i64;
                if newidx >= 0 && newidx < self.blksize() as i64 {
                    self.idx = newidx as usize;
                    Ok(real - self.block.len() as u64 + newidx as u64)
                } else if cur as i64 + offset < 0 {
                    Err(io::Error::from_raw_os_error(libc::EINVAL))
                } else {
                    self.seek(SeekFrom::Start((cur as i64 + offset) as u64))
                }
            }
            SeekFrom::End(_) => todo!("SeekFrom::End() is never needed: image size is fixed at format time and known from the superblock"),
        }
    }
}

/// Returns the size in bytes of the file at `path`, used by `format()` to
/// determine the image's total block count before any `BlockDevice` exists.
pub fn file_len(path: &Path) -> IoResult<u64> {
    Ok(std::fs::metadata(path)?.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FSIZE: u64 = 1 << 20;

    fn harness(rw: bool) -> BlockDevice<File> {
        let f = tempfile::NamedTempFile::new().unwrap();
        f.as_file().set_len(FSIZE).unwrap();
        let bd = BlockDevice::open(f.path(), rw).unwrap();
        assert!(FSIZE > 2 * bd.blksize() as u64);
        bd
    }

    #[test]
    fn simple_write_then_read() {
        let mut bd = harness(true);
        let bs = bd.blksize();
        let pos = bs + (bs >> 2);
        let mut buf = vec![0x55u8; bs];
        bd.seek(SeekFrom::Start(pos as u64)).unwrap();
        bd.write_all(&buf).unwrap();
        buf.fill(0);
        bd.seek(SeekFrom::Start(pos as u64)).unwrap();
        bd.read_exact(&mut buf).unwrap();
        assert_eq!(buf, vec![0x55u8; bs]);
    }

    #[test]
    fn current_neg_neg_is_rejected() {
        let mut bd = harness(false);
        let bs = bd.blksize();
        let initial = bs + (bs >> 2);
        bd.seek(SeekFrom::Start(initial as u64)).unwrap();
        let e = bd.seek(SeekFrom::Current(-2 * initial as i64)).unwrap_err();
        assert_eq!(libc::EINVAL, e.raw_os_error().unwrap());
    }
}
