//! Vector primitives: quantization, bit packing, and float kernels.
//!
//! This module provides the numeric building blocks of the index:
//! - `ScalarQuantizer`: centroid-relative 1-bit quantization with
//!   exactness-preserving correction terms
//! - `packing`: SIMD-width-aligned binary code packing
//! - `kernels`: float dot/distance kernels with runtime SIMD dispatch

pub mod kernels;
pub mod packing;
mod quantizer;

pub use quantizer::{normalize, CorrectionTerms, ScalarQuantizer};
