//! Brute-force scoring of quantized codes against a query.
//!
//! The query is quantized against the segment centroid with the same 1-bit
//! quantizer used at index time, so the per-vector comparison reduces to one
//! popcount plus a handful of scalar corrections. Reconstruction (step size
//! `Δ = upper − lower`, residuals `r̂[i] = lower + Δ·q[i]`):
//!
//! ```text
//! dot(r̂_d, r̂_q) = n·l_d·l_q + l_d·Δ_q·Σq_q + l_q·Δ_d·Σq_d + Δ_d·Δ_q·overlap
//! ‖r̂‖²          = n·l² + (2·l·Δ + Δ²)·Σq
//! ```
//!
//! with `overlap = popcount(code_d AND code_q)` and `n` the logical
//! dimension (padding bits are zero on both sides). Euclidean recovers the
//! distance from the residual norms; the dot-product family adds the stored
//! centroid dot product and the query's exact centroid terms. Every live
//! ordinal is scored; the only approximation is per-score, bounded by the
//! quantization error, so callers may re-rank the top candidates against the
//! raw vectors for exactness.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};

use ordered_float::OrderedFloat;
use roaring::RoaringBitmap;

use crate::config::VectorSimilarity;
use crate::error::{QuiverError, Result};
use crate::scorer::provider::{self, Kernel};
use crate::segment::{Ordinal, SegmentReader};
use crate::vector::kernels::{dot_f32, l2sq_f32};
use crate::vector::packing::{pack_binary, packed_len};
use crate::vector::{normalize, ScalarQuantizer};

/// How many vectors are scored between abort-signal checks. Small enough to
/// bound cancellation latency, large enough not to show up in profiles.
const ABORT_CHECK_INTERVAL: usize = 512;

/// Per-query scorer over one segment's quantized codes.
///
/// Borrows the reader's regions for the duration of the scoring calls and
/// holds nothing past its own lifetime.
pub struct QuantizedScorer<'a> {
    reader: &'a SegmentReader,
    kernel: Kernel,
    similarity: VectorSimilarity,
    bits: u8,
    dim: f32,
    /// The (Cosine: normalized) query, kept for exact rescoring.
    query: Vec<f32>,
    query_code: Vec<u8>,
    query_lower: f32,
    query_delta: f32,
    query_sum: f32,
    /// `dot(r_q, c)`, exact. Dot-product family only.
    query_centroid_term: f32,
    /// `‖r_q‖²`, exact. Euclidean only.
    query_residual_norm_sq: f32,
}

impl<'a> QuantizedScorer<'a> {
    pub fn new(reader: &'a SegmentReader, query: &[f32]) -> Result<Self> {
        let dim = reader.dimension();
        if query.len() != dim {
            return Err(QuiverError::DimensionMismatch {
                expected: dim,
                actual: query.len(),
            });
        }

        let similarity = reader.similarity();
        let mut query = query.to_vec();
        if similarity == VectorSimilarity::Cosine {
            normalize(&mut query);
        }

        let bits = reader.bits_per_component();
        let quantizer = ScalarQuantizer::new(similarity);
        let mut components = vec![0u8; dim];
        let corrections = quantizer.quantize(&query, reader.centroid(), bits, &mut components)?;
        let mut query_code = vec![0u8; packed_len(dim)];
        pack_binary(&components, &mut query_code);

        let query_centroid_term = if similarity.needs_magnitude_correction() {
            // dot(r_q, c) = dot(q, c) − dot(c, c)
            corrections.additional_correction - reader.centroid_self_dot()
        } else {
            0.0
        };
        let query_residual_norm_sq = if similarity == VectorSimilarity::Euclidean {
            l2sq_f32(&query, reader.centroid())
        } else {
            0.0
        };

        // The SIMD kernel wants one contiguous mapped region; a heap-buffered
        // quantized region takes the scalar path regardless of capability.
        let kernel = if reader.quantized_is_mapped() {
            provider::kernel()
        } else {
            Kernel::Scalar
        };

        Ok(Self {
            reader,
            kernel,
            similarity,
            bits,
            dim: dim as f32,
            query,
            query_code,
            query_lower: corrections.lower_interval,
            query_delta: corrections.delta(bits),
            query_sum: corrections.component_sum as f32,
            query_centroid_term,
            query_residual_norm_sq,
        })
    }

    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    /// Similarity estimate for one stored vector; higher is better for every
    /// similarity function.
    pub fn score(&self, ord: Ordinal) -> f32 {
        let code = self.reader.code(ord);
        let corrections = self.reader.corrections(ord);

        let overlap = self.kernel.and_popcount(code, &self.query_code) as f32;
        let lower = corrections.lower_interval;
        let delta = corrections.delta(self.bits);
        let sum = corrections.component_sum as f32;

        let residual_dot = self.dim * lower * self.query_lower
            + lower * self.query_delta * self.query_sum
            + self.query_lower * delta * sum
            + delta * self.query_delta * overlap;

        match self.similarity {
            VectorSimilarity::Euclidean => {
                let residual_norm_sq =
                    self.dim * lower * lower + (2.0 * lower * delta + delta * delta) * sum;
                let dist_sq =
                    (residual_norm_sq + self.query_residual_norm_sq - 2.0 * residual_dot).max(0.0);
                1.0 / (1.0 + dist_sq)
            }
            VectorSimilarity::DotProduct | VectorSimilarity::Cosine => {
                let dot =
                    residual_dot + corrections.additional_correction + self.query_centroid_term;
                ((1.0 + dot) / 2.0).max(0.0)
            }
            VectorSimilarity::MaxInnerProduct => {
                let dot =
                    residual_dot + corrections.additional_correction + self.query_centroid_term;
                if dot < 0.0 {
                    1.0 / (1.0 - dot)
                } else {
                    dot + 1.0
                }
            }
        }
    }

    /// Score every live ordinal and return the top `k` as `(ordinal, score)`
    /// in non-increasing score order.
    ///
    /// The abort signal is checked once per [`ABORT_CHECK_INTERVAL`] vectors;
    /// a raised signal stops the scan and the partial result reflects only
    /// the ordinals visited.
    pub fn search(
        &self,
        k: usize,
        deleted: Option<&RoaringBitmap>,
        abort: Option<&AtomicBool>,
    ) -> Vec<(Ordinal, f32)> {
        let mut heap: BinaryHeap<Reverse<(OrderedFloat<f32>, Ordinal)>> =
            BinaryHeap::with_capacity(k + 1);

        for (visited, ord) in self.reader.ordinals(deleted).enumerate() {
            if visited % ABORT_CHECK_INTERVAL == 0 {
                if let Some(flag) = abort {
                    if flag.load(Ordering::Relaxed) {
                        break;
                    }
                }
            }
            let score = self.score(ord);
            if heap.len() < k {
                heap.push(Reverse((OrderedFloat(score), ord)));
            } else {
                let worst = heap.peek().map_or(f32::INFINITY, |Reverse((s, _))| s.0);
                if score > worst {
                    heap.pop();
                    heap.push(Reverse((OrderedFloat(score), ord)));
                }
            }
        }

        let mut results: Vec<(Ordinal, f32)> = heap
            .into_iter()
            .map(|Reverse((score, ord))| (ord, score.0))
            .collect();
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        results
    }

    /// Re-rank candidates with exact float similarity against the raw
    /// region. Returns the candidates in non-increasing exact-score order.
    pub fn rescore(&self, candidates: &[(Ordinal, f32)]) -> Result<Vec<(Ordinal, f32)>> {
        let mut row = vec![0.0f32; self.query.len()];
        let mut results = Vec::with_capacity(candidates.len());
        for &(ord, _) in candidates {
            self.reader.read_raw_vector(ord, &mut row)?;
            results.push((ord, exact_score(self.similarity, &self.query, &row)));
        }
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        Ok(results)
    }
}

/// Exact similarity score between two float vectors, on the same scale as
/// the quantized estimates.
pub(crate) fn exact_score(similarity: VectorSimilarity, query: &[f32], vector: &[f32]) -> f32 {
    match similarity {
        VectorSimilarity::Euclidean => 1.0 / (1.0 + l2sq_f32(query, vector)),
        VectorSimilarity::DotProduct | VectorSimilarity::Cosine => {
            ((1.0 + dot_f32(query, vector)) / 2.0).max(0.0)
        }
        VectorSimilarity::MaxInnerProduct => {
            let dot = dot_f32(query, vector);
            if dot < 0.0 {
                1.0 / (1.0 - dot)
            } else {
                dot + 1.0
            }
        }
    }
}
