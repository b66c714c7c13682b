//! Binary layout of the persisted segment regions.
//!
//! Two files per field, little-endian throughout:
//!
//! Raw region (`<name>.vec`):
//!   Magic: "QVRW" (4 bytes)
//!   Version: u16
//!   Dimension: u32
//!   Count: u32
//!   Count x Dimension x f32 vector data
//!   CRC32 footer: u32 (over everything before it)
//!
//! Quantized region (`<name>.veb`):
//!   Magic: "QVQZ" (4 bytes)
//!   Version: u16
//!   Dimension: u32
//!   Bits: u8
//!   Similarity: u8
//!   Count: u32
//!   Centroid: Dimension x f32
//!   Count x { packed code | lower f32 | upper f32 | component_sum i32 |
//!             additional f32 }
//!   CRC32 footer: u32
//!
//! Vector `ord` in the raw region starts at `RAW_HEADER_LEN + ord * dim * 4`.

use std::io::{self, Write};

use crc32fast::Hasher;

use crate::config::VectorSimilarity;
use crate::error::{QuiverError, Result};
use crate::vector::packing::packed_len;

pub(crate) const RAW_MAGIC: [u8; 4] = *b"QVRW";
pub(crate) const QUANT_MAGIC: [u8; 4] = *b"QVQZ";
pub(crate) const FORMAT_VERSION: u16 = 1;

pub(crate) const RAW_HEADER_LEN: usize = 14;
pub(crate) const QUANT_HEADER_LEN: usize = 16;
pub(crate) const FOOTER_LEN: usize = 4;
pub(crate) const CORRECTIONS_LEN: usize = 16;

/// Byte length of one quantized record (packed code + correction terms).
pub(crate) fn record_len(dimension: usize) -> usize {
    packed_len(dimension) + CORRECTIONS_LEN
}

fn corrupt(msg: impl Into<String>) -> QuiverError {
    QuiverError::CorruptSegment(msg.into())
}

/// Header of the raw vector region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RawHeader {
    pub dimension: u32,
    pub count: u32,
}

impl RawHeader {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&RAW_MAGIC)?;
        w.write_all(&FORMAT_VERSION.to_le_bytes())?;
        w.write_all(&self.dimension.to_le_bytes())?;
        w.write_all(&self.count.to_le_bytes())
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RAW_HEADER_LEN {
            return Err(corrupt("raw region shorter than its header"));
        }
        if bytes[0..4] != RAW_MAGIC {
            return Err(corrupt("raw region magic mismatch"));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != FORMAT_VERSION {
            return Err(corrupt(format!("unknown raw region version {version}")));
        }
        Ok(Self {
            dimension: u32::from_le_bytes(bytes[6..10].try_into().unwrap()),
            count: u32::from_le_bytes(bytes[10..14].try_into().unwrap()),
        })
    }

    /// Total file length this header implies, footer included.
    pub fn expected_file_len(&self) -> u64 {
        RAW_HEADER_LEN as u64 + self.count as u64 * self.dimension as u64 * 4 + FOOTER_LEN as u64
    }
}

/// Header of the quantized region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct QuantHeader {
    pub dimension: u32,
    pub bits: u8,
    pub similarity: VectorSimilarity,
    pub count: u32,
}

impl QuantHeader {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&QUANT_MAGIC)?;
        w.write_all(&FORMAT_VERSION.to_le_bytes())?;
        w.write_all(&self.dimension.to_le_bytes())?;
        w.write_all(&[self.bits, self.similarity.to_code()])?;
        w.write_all(&self.count.to_le_bytes())
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < QUANT_HEADER_LEN {
            return Err(corrupt("quantized region shorter than its header"));
        }
        if bytes[0..4] != QUANT_MAGIC {
            return Err(corrupt("quantized region magic mismatch"));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != FORMAT_VERSION {
            return Err(corrupt(format!("unknown quantized region version {version}")));
        }
        let similarity = VectorSimilarity::from_code(bytes[11])
            .ok_or_else(|| corrupt(format!("unknown similarity code {}", bytes[11])))?;
        Ok(Self {
            dimension: u32::from_le_bytes(bytes[6..10].try_into().unwrap()),
            bits: bytes[10],
            similarity,
            count: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
        })
    }

    /// Total file length this header implies, footer included.
    pub fn expected_file_len(&self) -> u64 {
        QUANT_HEADER_LEN as u64
            + self.dimension as u64 * 4
            + self.count as u64 * record_len(self.dimension as usize) as u64
            + FOOTER_LEN as u64
    }
}

/// Writer wrapper that hashes every byte and appends a CRC32 footer.
pub(crate) struct ChecksumWriter<W: Write> {
    inner: W,
    hasher: Hasher,
    written: u64,
}

impl<W: Write> ChecksumWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Hasher::new(),
            written: 0,
        }
    }

    /// Write the footer and return the total byte count, footer included.
    pub fn finish(mut self) -> io::Result<u64> {
        let crc = self.hasher.finalize();
        self.inner.write_all(&crc.to_le_bytes())?;
        self.inner.flush()?;
        Ok(self.written + FOOTER_LEN as u64)
    }
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Validate the CRC32 footer of a fully resident region.
pub(crate) fn verify_footer(bytes: &[u8]) -> Result<()> {
    if bytes.len() < FOOTER_LEN {
        return Err(corrupt("region shorter than its checksum footer"));
    }
    let payload = &bytes[..bytes.len() - FOOTER_LEN];
    let stored = u32::from_le_bytes(bytes[bytes.len() - FOOTER_LEN..].try_into().unwrap());
    let mut hasher = Hasher::new();
    hasher.update(payload);
    let actual = hasher.finalize();
    if actual != stored {
        return Err(corrupt(format!(
            "checksum mismatch: stored {stored:#010x}, computed {actual:#010x}"
        )));
    }
    Ok(())
}
