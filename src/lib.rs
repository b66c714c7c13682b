//! Quantized vector indexing and similarity scoring.
//!
//! Converts high-dimensional float vectors into compact 1-bit codes
//! quantized against a per-segment centroid, persists them alongside
//! correction metadata, and scores queries against them with a
//! popcount-based kernel (SIMD when the hardware and memory layout allow,
//! scalar otherwise). Search is brute-force over the quantized codes;
//! quantization cheapens comparison, it does not reduce the candidate set.

pub mod config;
pub mod error;
pub mod scorer;
pub mod segment;
pub mod vector;

pub use config::{FieldConfig, RawIoStrategy, VectorSimilarity};
pub use error::{QuiverError, Result};
pub use scorer::{Kernel, QuantizedScorer};
pub use segment::{
    MergeCoordinator, MergeInput, Ordinal, RawAccessKind, RegionAccess, SegmentFiles,
    SegmentReader, SegmentWriter,
};
pub use vector::{CorrectionTerms, ScalarQuantizer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
