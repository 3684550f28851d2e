//! Symmetric little-endian encode/decode of fixed-size on-disk records at
//! absolute byte offsets.
//!
//! Grounded on the teacher's `Decoder<T>`, simplified to a single
//! little-endian fixed-int configuration (the spec fixes byte order; there
//! is no big-endian UFS image to sniff) and extended with the write
//! direction, which the retrieved teacher snapshot calls (`encode_at`,
//! `fill_at`) but does not itself define.

use std::io::{BufRead, Result, Seek, SeekFrom, Write};

use bincode::config::{Configuration, Fixint, LittleEndian, NoLimit};
use bincode::{Decode, Encode};

pub type Config = Configuration<LittleEndian, Fixint, NoLimit>;

pub fn config() -> Config {
    bincode::config::standard()
        .with_fixed_int_encoding()
        .with_little_endian()
}

fn to_io_err<E: std::fmt::Display>(e: E) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
}

/// Wraps any `Read + Write + Seek` backend with record-at-a-time codec
/// helpers. Does no buffering of its own; that is [`crate::block::BlockDevice`]'s
/// job one layer down.
pub struct Codec<T> {
    inner: T,
}

impl<T> Codec<T> {
    pub fn new(inner: T) -> Self {
        Codec { inner }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: BufRead + Write + Seek> Codec<T> {
    pub fn seek(&mut self, pos: u64) -> Result<u64> {
        self.inner.seek(SeekFrom::Start(pos))
    }

    pub fn pos(&mut self) -> Result<u64> {
        self.inner.stream_position()
    }

    pub fn decode<D: Decode>(&mut self) -> Result<D> {
        bincode::decode_from_reader(&mut self.inner, config()).map_err(to_io_err)
    }

    pub fn decode_at<D: Decode>(&mut self, pos: u64) -> Result<D> {
        self.seek(pos)?;
        self.decode()
    }

    pub fn encode<E: Encode>(&mut self, value: &E) -> Result<()> {
        let buf = bincode::encode_to_vec(value, config()).map_err(to_io_err)?;
        self.inner.write_all(&buf)
    }

    pub fn encode_at<E: Encode>(&mut self, pos: u64, value: &E) -> Result<()> {
        self.seek(pos)?;
        self.encode(value)
    }

    pub fn read_exact_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<()> {
        self.seek(pos)?;
        self.inner.read_exact(buf)
    }

    pub fn write_all_at(&mut self, pos: u64, buf: &[u8]) -> Result<()> {
        self.seek(pos)?;
        self.inner.write_all(buf)
    }

    /// Writes `len` copies of `val` starting at `pos`, used to zero a
    /// freed record or block range.
    pub fn fill_at(&mut self, pos: u64, val: u8, len: usize) -> Result<()> {
        self.seek(pos)?;
        let buf = vec![val; len];
        self.inner.write_all(&buf)
    }
}

/// Decodes a record out of an in-memory buffer, used when a block's bytes
/// are already resident (e.g. just copied for a CoW) and a fresh disk read
/// would be redundant.
pub fn decode_from_bytes<D: Decode>(buf: &[u8]) -> Result<D> {
    bincode::decode_from_slice(buf, config()).map(|(v, _)| v).map_err(to_io_err)
}
