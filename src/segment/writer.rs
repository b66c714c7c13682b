//! Segment writer: buffers raw vectors and flushes both persisted regions.
//!
//! At flush the writer computes the field centroid over every buffered
//! vector, quantizes each vector against it, packs the codes, and writes the
//! raw and quantized regions in document order. The resulting segment data is
//! immutable; merges supersede it with a freshly written segment.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::debug;

use crate::config::{FieldConfig, VectorSimilarity};
use crate::error::{QuiverError, Result};
use crate::segment::format::{ChecksumWriter, QuantHeader, RawHeader};
use crate::segment::types::{Ordinal, SegmentFiles};
use crate::vector::packing::{pack_binary, packed_len};
use crate::vector::{normalize, ScalarQuantizer};

/// Single-writer buffer for one field's vectors in one segment.
///
/// Exclusive use during a flush or merge is enforced by the indexing layer;
/// the writer itself holds no locks.
pub struct SegmentWriter {
    config: FieldConfig,
    /// Row-major vector buffer. Cosine rows are stored unit-normalized.
    vectors: Vec<f32>,
    count: u32,
}

impl SegmentWriter {
    pub fn new(config: FieldConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            vectors: Vec::new(),
            count: 0,
        })
    }

    /// Buffer one vector, returning its ordinal within the segment.
    ///
    /// Rejects rows whose length disagrees with the field configuration.
    /// Cosine vectors are normalized on the way in, so both the raw region
    /// and the quantization inputs see the unit-length form.
    pub fn add_vector(&mut self, vector: &[f32]) -> Result<Ordinal> {
        let dim = self.config.dimension as usize;
        if vector.len() != dim {
            return Err(QuiverError::DimensionMismatch {
                expected: dim,
                actual: vector.len(),
            });
        }

        let start = self.vectors.len();
        self.vectors.extend_from_slice(vector);
        if self.config.similarity == VectorSimilarity::Cosine {
            normalize(&mut self.vectors[start..]);
        }

        let ordinal = self.count;
        self.count += 1;
        Ok(ordinal)
    }

    pub fn vector_count(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Componentwise mean of all buffered vectors.
    fn centroid(&self) -> Vec<f32> {
        let dim = self.config.dimension as usize;
        let mut centroid = vec![0.0f32; dim];
        if self.count == 0 {
            return centroid;
        }
        for row in self.vectors.chunks_exact(dim) {
            for (acc, v) in centroid.iter_mut().zip(row) {
                *acc += v;
            }
        }
        let inv = 1.0 / self.count as f32;
        for c in centroid.iter_mut() {
            *c *= inv;
        }
        centroid
    }

    /// Write both regions under `dir` as `<name>.vec` and `<name>.veb`.
    ///
    /// Output is a deterministic function of the buffered vectors and the
    /// field configuration.
    pub fn flush(&self, dir: &Path, name: &str) -> Result<SegmentFiles> {
        let dim = self.config.dimension as usize;
        let raw_path = dir.join(format!("{name}.vec"));
        let quantized_path = dir.join(format!("{name}.veb"));

        // Raw region: header + flat f32 rows.
        let mut raw = ChecksumWriter::new(BufWriter::new(File::create(&raw_path)?));
        RawHeader {
            dimension: self.config.dimension,
            count: self.count,
        }
        .write_to(&mut raw)?;
        for row in self.vectors.chunks_exact(dim) {
            for v in row {
                raw.write_all(&v.to_le_bytes())?;
            }
        }
        let raw_bytes = raw.finish()?;

        // Quantized region: header + centroid + per-vector records.
        let centroid = self.centroid();
        let quantizer = ScalarQuantizer::new(self.config.similarity);
        let bits = self.config.bits_per_component;

        let mut quant = ChecksumWriter::new(BufWriter::new(File::create(&quantized_path)?));
        QuantHeader {
            dimension: self.config.dimension,
            bits,
            similarity: self.config.similarity,
            count: self.count,
        }
        .write_to(&mut quant)?;
        for c in &centroid {
            quant.write_all(&c.to_le_bytes())?;
        }

        let mut code = vec![0u8; dim];
        let mut packed = vec![0u8; packed_len(dim)];
        for row in self.vectors.chunks_exact(dim) {
            let corrections = quantizer.quantize(row, &centroid, bits, &mut code)?;
            pack_binary(&code, &mut packed);
            quant.write_all(&packed)?;
            quant.write_all(&corrections.lower_interval.to_le_bytes())?;
            quant.write_all(&corrections.upper_interval.to_le_bytes())?;
            quant.write_all(&corrections.component_sum.to_le_bytes())?;
            quant.write_all(&corrections.additional_correction.to_le_bytes())?;
        }
        let quantized_bytes = quant.finish()?;

        debug!(
            name,
            count = self.count,
            raw_bytes,
            quantized_bytes,
            "flushed segment vector data"
        );

        Ok(SegmentFiles {
            raw_path,
            quantized_path,
            raw_bytes,
            quantized_bytes,
        })
    }
}
