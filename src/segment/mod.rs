//! Segment store for quantized vector fields.
//!
//! Each field in a segment persists two regions: a flat full-precision
//! vector store (randomly accessible, memory-mappable) and a quantized
//! store (centroid, packed codes, correction terms). Segments are immutable
//! after flush; merges write a new segment rather than mutating in place.
//!
//! # Architecture
//!
//! - `SegmentWriter`: buffers vectors, quantizes at flush, writes both regions
//! - `SegmentReader`: immutable random-access reads, strategy-aware raw I/O
//! - `MergeCoordinator`: recomputes the centroid and re-quantizes survivors

mod format;
mod merge;
mod reader;
mod types;
mod writer;

pub use merge::{MergeCoordinator, MergeInput};
pub use reader::{OrdinalIter, SegmentReader};
pub use types::{Ordinal, RawAccessKind, RegionAccess, SegmentFiles};
pub use writer::SegmentWriter;
