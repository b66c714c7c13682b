//! Core types for the segment vector store

use std::path::PathBuf;

/// Dense vector ordinal within a segment (0..vector_count), assigned in
/// document order at write time.
pub type Ordinal = u32;

/// Paths and sizes of the two persisted regions of one field's segment data.
#[derive(Clone, Debug)]
pub struct SegmentFiles {
    /// Flat full-precision vector region (randomly addressable).
    pub raw_path: PathBuf,
    /// Quantized region: centroid, packed codes, correction terms.
    pub quantized_path: PathBuf,
    /// Total bytes written to the raw region, framing included.
    pub raw_bytes: u64,
    /// Total bytes written to the quantized region, framing included.
    pub quantized_bytes: u64,
}

/// Which access context a reader is opened for.
///
/// Search-time readers may bypass the page cache for the raw region (one-shot
/// brute-force scans pollute it); merge-time readers always want the
/// conventional cached path for their large sequential passes. The context is
/// passed explicitly instead of being inferred from the call site.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionAccess {
    SearchAccess,
    MergeAccess,
}

/// The raw-region read path a reader actually ended up with, after strategy
/// resolution and capability probing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawAccessKind {
    /// Unbuffered reads bypassing the page cache.
    Direct,
    /// Conventional memory-mapped access.
    Mapped,
}
