//! Centroid-relative scalar quantization.
//!
//! Each vector is quantized against the segment centroid: the residual
//! `r[i] = v[i] - c[i]` is linearly scaled into `[0, 2^bits - 1]` using the
//! residual's own min/max as the quantization interval. The interval bounds,
//! the integer sum of the quantized components, and (for similarities that
//! compare magnitudes) the vector's dot product with the centroid are kept
//! as correction terms so scoring can reconstruct an unbiased similarity
//! estimate from the lossy code.

use crate::config::VectorSimilarity;
use crate::error::{QuiverError, Result};
use crate::vector::kernels::dot_f32;

/// Per-vector correction record persisted next to each quantized code.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CorrectionTerms {
    /// Lower bound of the residual quantization interval, `min(r)`.
    pub lower_interval: f32,
    /// Upper bound of the residual quantization interval, `max(r)`.
    pub upper_interval: f32,
    /// Integer sum of the quantized components before packing.
    pub component_sum: i32,
    /// Dot product with the centroid for magnitude-compensated similarities,
    /// 0.0 for Euclidean.
    pub additional_correction: f32,
}

impl CorrectionTerms {
    /// Quantization step size for the stored bit width.
    pub fn delta(&self, bits: u8) -> f32 {
        (self.upper_interval - self.lower_interval) / ((1u32 << bits) - 1) as f32
    }
}

/// Quantizer for a single field's similarity function.
///
/// Stateless apart from the similarity choice: quantization is a pure,
/// deterministic function of `(vector, centroid, bits)`.
pub struct ScalarQuantizer {
    similarity: VectorSimilarity,
}

impl ScalarQuantizer {
    pub fn new(similarity: VectorSimilarity) -> Self {
        Self { similarity }
    }

    pub fn similarity(&self) -> VectorSimilarity {
        self.similarity
    }

    /// Quantize `vector` against `centroid` into per-component integer codes.
    ///
    /// `code` receives one value in `[0, 2^bits - 1]` per component. Fails
    /// with `DimensionMismatch` if the lengths disagree.
    pub fn quantize(
        &self,
        vector: &[f32],
        centroid: &[f32],
        bits: u8,
        code: &mut [u8],
    ) -> Result<CorrectionTerms> {
        if vector.len() != centroid.len() {
            return Err(QuiverError::DimensionMismatch {
                expected: centroid.len(),
                actual: vector.len(),
            });
        }
        debug_assert_eq!(code.len(), vector.len());
        debug_assert!(bits >= 1 && bits <= 8);

        let mut lower = f32::INFINITY;
        let mut upper = f32::NEG_INFINITY;
        for (v, c) in vector.iter().zip(centroid) {
            let r = v - c;
            lower = lower.min(r);
            upper = upper.max(r);
        }

        let max_level = ((1u32 << bits) - 1) as f32;
        let range = upper - lower;
        // A constant residual quantizes to all zeros with a degenerate
        // interval; delta() is then 0 and scoring sees no residual spread.
        let scale = if range > f32::EPSILON {
            max_level / range
        } else {
            0.0
        };

        let mut component_sum = 0i32;
        for (i, (v, c)) in vector.iter().zip(centroid).enumerate() {
            let r = v - c;
            let q = ((r - lower) * scale).round().clamp(0.0, max_level) as u8;
            code[i] = q;
            component_sum += q as i32;
        }

        let additional_correction = if self.similarity.needs_magnitude_correction() {
            dot_f32(vector, centroid)
        } else {
            0.0
        };

        Ok(CorrectionTerms {
            lower_interval: lower,
            upper_interval: upper,
            component_sum,
            additional_correction,
        })
    }
}

/// Scale `vector` to unit length in place.
///
/// Cosine fields normalize before quantization and before the raw region is
/// written, so the stored vectors are the normalized forms. Zero vectors are
/// left unchanged.
pub fn normalize(vector: &mut [f32]) {
    let norm_sq = dot_f32(vector, vector);
    if norm_sq > f32::EPSILON {
        let inv = 1.0 / norm_sq.sqrt();
        for v in vector.iter_mut() {
            *v *= inv;
        }
    }
}
