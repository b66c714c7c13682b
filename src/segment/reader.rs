//! Immutable segment reader over the persisted vector regions.
//!
//! A reader owns its region resources (memory maps, direct-I/O handles) for
//! its whole lifetime and releases them on drop, including on every open
//! failure path. Readers are immutable after open and safe for unbounded
//! concurrent reads; scoring takes no locks. Within one reader the raw
//! region is either mapped or direct, never both, so direct reads are never
//! interleaved with mapped access to the same file.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;

use memmap2::Mmap;
use roaring::RoaringBitmap;
use tracing::{debug, warn};

use crate::config::{FieldConfig, RawIoStrategy, VectorSimilarity};
use crate::error::{QuiverError, Result};
use crate::segment::format::{
    record_len, verify_footer, QuantHeader, RawHeader, CORRECTIONS_LEN, FOOTER_LEN,
    QUANT_HEADER_LEN, RAW_HEADER_LEN,
};
use crate::segment::types::{Ordinal, RawAccessKind, RegionAccess, SegmentFiles};
use crate::vector::kernels::dot_f32;
use crate::vector::packing::packed_len;
use crate::vector::CorrectionTerms;

fn corrupt(msg: impl Into<String>) -> QuiverError {
    QuiverError::CorruptSegment(msg.into())
}

/// Quantized region residency. The mapped form is the contiguous layout the
/// SIMD scorer requires; the buffered form is the fallback when mapping is
/// unavailable.
enum QuantizedRegion {
    Mapped(Mmap),
    Buffered(Vec<u8>),
}

impl QuantizedRegion {
    fn bytes(&self) -> &[u8] {
        match self {
            QuantizedRegion::Mapped(mmap) => mmap,
            QuantizedRegion::Buffered(vec) => vec,
        }
    }

    fn is_mapped(&self) -> bool {
        matches!(self, QuantizedRegion::Mapped(_))
    }
}

/// Raw region access path, fixed at open time.
enum RawRegion {
    Mapped(Mmap),
    #[cfg(unix)]
    Direct(direct::DirectFile),
}

/// Reader for one field's segment vector data.
pub struct SegmentReader {
    config: FieldConfig,
    files: SegmentFiles,
    access: RegionAccess,
    dimension: usize,
    count: u32,
    bits: u8,
    centroid: Vec<f32>,
    centroid_self_dot: f32,
    quantized: QuantizedRegion,
    records_start: usize,
    record_len: usize,
    raw: RawRegion,
}

impl std::fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentReader")
            .field("dimension", &self.dimension)
            .field("count", &self.count)
            .field("bits", &self.bits)
            .finish_non_exhaustive()
    }
}

impl SegmentReader {
    /// Open both regions and validate their framing.
    ///
    /// Header, length, or checksum inconsistencies surface as
    /// `CorruptSegment`; the affected segment is unusable and the error is
    /// not retried.
    pub fn open(files: SegmentFiles, config: FieldConfig, access: RegionAccess) -> Result<Self> {
        config.validate()?;
        let dimension = config.dimension as usize;

        // Quantized region: mapped when possible, heap-buffered otherwise.
        let quant_file = File::open(&files.quantized_path)?;
        let quantized = match unsafe { Mmap::map(&quant_file) } {
            Ok(mmap) => QuantizedRegion::Mapped(mmap),
            Err(e) => {
                warn!(error = %e, "quantized region not mappable, buffering on heap");
                let mut buf = Vec::new();
                File::open(&files.quantized_path)?.read_to_end(&mut buf)?;
                QuantizedRegion::Buffered(buf)
            }
        };

        let bytes = quantized.bytes();
        let header = QuantHeader::parse(bytes)?;
        if header.expected_file_len() != bytes.len() as u64 {
            return Err(corrupt(format!(
                "quantized region length {} does not match header (dimension {}, count {})",
                bytes.len(),
                header.dimension,
                header.count
            )));
        }
        verify_footer(bytes)?;
        if header.dimension != config.dimension {
            return Err(corrupt(format!(
                "quantized region dimension {} disagrees with field configuration {}",
                header.dimension, config.dimension
            )));
        }
        if header.bits != config.bits_per_component || header.similarity != config.similarity {
            return Err(corrupt(
                "quantized region bits/similarity disagree with field configuration",
            ));
        }

        let mut centroid = vec![0.0f32; dimension];
        for (i, chunk) in bytes[QUANT_HEADER_LEN..QUANT_HEADER_LEN + dimension * 4]
            .chunks_exact(4)
            .enumerate()
        {
            centroid[i] = f32::from_le_bytes(chunk.try_into().unwrap());
        }
        let centroid_self_dot = dot_f32(&centroid, &centroid);

        // Raw region: the access context picks the strategy. Merges always
        // take the conventional mapped path; search honours the configured
        // strategy, degraded by the capability probe.
        let resolved = match access {
            RegionAccess::MergeAccess => RawIoStrategy::Buffered,
            RegionAccess::SearchAccess => {
                let dir = files.raw_path.parent().unwrap_or(std::path::Path::new("."));
                config.effective_raw_io(dir)
            }
        };
        let raw = Self::open_raw(&files, resolved)?;

        let raw_header = match &raw {
            RawRegion::Mapped(mmap) => {
                verify_footer(mmap)?;
                RawHeader::parse(mmap)?
            }
            #[cfg(unix)]
            RawRegion::Direct(file) => {
                let mut head = [0u8; RAW_HEADER_LEN];
                file.read_at_into(0, &mut head)
                    .map_err(|_| corrupt("raw region shorter than its header"))?;
                RawHeader::parse(&head)?
            }
        };
        let raw_len = std::fs::metadata(&files.raw_path)?.len();
        if raw_header.expected_file_len() != raw_len {
            return Err(corrupt(format!(
                "raw region length {} does not match header (dimension {}, count {})",
                raw_len, raw_header.dimension, raw_header.count
            )));
        }
        if raw_header.dimension != header.dimension || raw_header.count != header.count {
            return Err(corrupt(
                "raw and quantized region headers disagree on dimension or count",
            ));
        }

        let raw_kind = match &raw {
            RawRegion::Mapped(_) => RawAccessKind::Mapped,
            #[cfg(unix)]
            RawRegion::Direct(_) => RawAccessKind::Direct,
        };
        debug!(
            path = %files.quantized_path.display(),
            count = header.count,
            access = ?access,
            raw_access = ?raw_kind,
            "opened segment vector reader"
        );

        Ok(Self {
            access,
            dimension,
            count: header.count,
            bits: header.bits,
            centroid,
            centroid_self_dot,
            quantized,
            records_start: QUANT_HEADER_LEN + dimension * 4,
            record_len: record_len(dimension),
            raw,
            config,
            files,
        })
    }

    fn open_raw(files: &SegmentFiles, strategy: RawIoStrategy) -> Result<RawRegion> {
        #[cfg(unix)]
        if strategy == RawIoStrategy::Direct {
            match direct::DirectFile::open(&files.raw_path) {
                Ok(file) => return Ok(RawRegion::Direct(file)),
                Err(e) => {
                    warn!(error = %e, "direct raw region open failed, using mapped access");
                }
            }
        }
        #[cfg(not(unix))]
        let _ = strategy;

        let file = File::open(&files.raw_path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(RawRegion::Mapped(mmap))
    }

    pub fn vector_count(&self) -> u32 {
        self.count
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn similarity(&self) -> VectorSimilarity {
        self.config.similarity
    }

    pub fn bits_per_component(&self) -> u8 {
        self.bits
    }

    pub fn config(&self) -> &FieldConfig {
        &self.config
    }

    pub fn access(&self) -> RegionAccess {
        self.access
    }

    /// The segment centroid all codes were quantized against.
    pub fn centroid(&self) -> &[f32] {
        &self.centroid
    }

    pub(crate) fn centroid_self_dot(&self) -> f32 {
        self.centroid_self_dot
    }

    /// Packed quantized code for `ord`.
    ///
    /// Every code in a segment has the same byte length.
    pub fn code(&self, ord: Ordinal) -> &[u8] {
        assert!(ord < self.count, "ordinal {ord} out of range {}", self.count);
        let start = self.records_start + ord as usize * self.record_len;
        &self.quantized.bytes()[start..start + packed_len(self.dimension)]
    }

    /// Correction terms for `ord`.
    pub fn corrections(&self, ord: Ordinal) -> CorrectionTerms {
        assert!(ord < self.count, "ordinal {ord} out of range {}", self.count);
        let start =
            self.records_start + ord as usize * self.record_len + packed_len(self.dimension);
        let b = &self.quantized.bytes()[start..start + CORRECTIONS_LEN];
        CorrectionTerms {
            lower_interval: f32::from_le_bytes(b[0..4].try_into().unwrap()),
            upper_interval: f32::from_le_bytes(b[4..8].try_into().unwrap()),
            component_sum: i32::from_le_bytes(b[8..12].try_into().unwrap()),
            additional_correction: f32::from_le_bytes(b[12..16].try_into().unwrap()),
        }
    }

    /// Read the full-precision vector for `ord` into `out`.
    ///
    /// For Cosine fields this is the unit-normalized form that was indexed.
    pub fn read_raw_vector(&self, ord: Ordinal, out: &mut [f32]) -> Result<()> {
        assert!(ord < self.count, "ordinal {ord} out of range {}", self.count);
        if out.len() != self.dimension {
            return Err(QuiverError::DimensionMismatch {
                expected: self.dimension,
                actual: out.len(),
            });
        }
        let offset = RAW_HEADER_LEN as u64 + ord as u64 * self.dimension as u64 * 4;
        match &self.raw {
            RawRegion::Mapped(mmap) => {
                let start = offset as usize;
                let bytes = &mmap[start..start + self.dimension * 4];
                for (v, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
                    *v = f32::from_le_bytes(chunk.try_into().unwrap());
                }
            }
            #[cfg(unix)]
            RawRegion::Direct(file) => {
                let mut bytes = vec![0u8; self.dimension * 4];
                file.read_at_into(offset, &mut bytes)?;
                for (v, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
                    *v = f32::from_le_bytes(chunk.try_into().unwrap());
                }
            }
        }
        Ok(())
    }

    /// Monotonic iterator over live ordinals, skipping `deleted`.
    pub fn ordinals<'a>(&self, deleted: Option<&'a RoaringBitmap>) -> OrdinalIter<'a> {
        OrdinalIter {
            next: 0,
            count: self.count,
            deleted,
        }
    }

    /// Which raw-region read path is in effect.
    pub fn raw_access(&self) -> RawAccessKind {
        match self.raw {
            RawRegion::Mapped(_) => RawAccessKind::Mapped,
            #[cfg(unix)]
            RawRegion::Direct(_) => RawAccessKind::Direct,
        }
    }

    /// Whether the quantized region is one contiguous mapped slice.
    pub fn quantized_is_mapped(&self) -> bool {
        self.quantized.is_mapped()
    }

    /// Off-heap (page-cache-resident) bytes per region.
    ///
    /// `"vec"` is the raw vector data and is reported only under mapped
    /// access; the direct-I/O path deliberately keeps it out of the page
    /// cache. `"veb"` is the quantized data (centroid, codes, corrections).
    pub fn off_heap_byte_size(&self) -> BTreeMap<&'static str, u64> {
        let mut sizes = BTreeMap::new();
        if self.quantized.is_mapped() {
            let bytes = self.quantized.bytes().len();
            sizes.insert(
                "veb",
                (bytes - QUANT_HEADER_LEN - FOOTER_LEN) as u64,
            );
        }
        if matches!(self.raw, RawRegion::Mapped(_)) {
            sizes.insert("vec", self.count as u64 * self.dimension as u64 * 4);
        }
        sizes
    }

    /// A conventional-I/O reader over the same files for merge use.
    ///
    /// Merges are large sequential passes and must not inherit the
    /// search-time direct-I/O strategy.
    pub fn merge_instance(&self) -> Result<SegmentReader> {
        SegmentReader::open(
            self.files.clone(),
            self.config.clone(),
            RegionAccess::MergeAccess,
        )
    }
}

/// Iterator over live ordinals in ascending order.
pub struct OrdinalIter<'a> {
    next: u32,
    count: u32,
    deleted: Option<&'a RoaringBitmap>,
}

impl Iterator for OrdinalIter<'_> {
    type Item = Ordinal;

    fn next(&mut self) -> Option<Ordinal> {
        while self.next < self.count {
            let ord = self.next;
            self.next += 1;
            if self.deleted.map_or(true, |d| !d.contains(ord)) {
                return Some(ord);
            }
        }
        None
    }
}

/// Unbuffered reads that bypass the page cache.
///
/// `O_DIRECT` requires sector-aligned file offsets, lengths, and buffer
/// memory; reads go through an internal aligned bounce buffer.
#[cfg(unix)]
mod direct {
    use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::unix::fs::{FileExt, OpenOptionsExt};
    use std::path::Path;

    const SECTOR: usize = 512;

    pub(super) struct DirectFile {
        file: File,
    }

    impl DirectFile {
        pub fn open(path: &Path) -> io::Result<Self> {
            let file = OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_DIRECT)
                .open(path)?;
            Ok(Self { file })
        }

        /// Read `out.len()` bytes starting at an arbitrary `offset`.
        pub fn read_at_into(&self, offset: u64, out: &mut [u8]) -> io::Result<()> {
            let aligned_start = offset / SECTOR as u64 * SECTOR as u64;
            let front_pad = (offset - aligned_start) as usize;
            let span = (front_pad + out.len()).div_ceil(SECTOR) * SECTOR;

            let mut buf = AlignedBuf::new(span);
            let slice = buf.as_mut_slice();

            // A short read is only legal at end of file.
            let mut filled = 0;
            while filled < span {
                let n = self
                    .file
                    .read_at(&mut slice[filled..], aligned_start + filled as u64)?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled < front_pad + out.len() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "direct read past end of raw region",
                ));
            }

            out.copy_from_slice(&slice[front_pad..front_pad + out.len()]);
            Ok(())
        }
    }

    /// Sector-aligned heap buffer for `O_DIRECT` transfers.
    struct AlignedBuf {
        ptr: *mut u8,
        layout: Layout,
    }

    impl AlignedBuf {
        fn new(len: usize) -> Self {
            let layout = Layout::from_size_align(len, SECTOR).expect("valid aligned layout");
            let ptr = unsafe { alloc(layout) };
            if ptr.is_null() {
                handle_alloc_error(layout);
            }
            Self { ptr, layout }
        }

        fn as_mut_slice(&mut self) -> &mut [u8] {
            unsafe { std::slice::from_raw_parts_mut(self.ptr, self.layout.size()) }
        }
    }

    impl Drop for AlignedBuf {
        fn drop(&mut self) {
            unsafe { dealloc(self.ptr, self.layout) };
        }
    }
}
