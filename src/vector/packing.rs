//! Bit packing for 1-bit quantized codes.
//!
//! Packed buffers are sized to a multiple of the 64-bit SIMD lane width so
//! the popcount kernels can always process whole `u64` words. Bits are laid
//! out most-significant-bit-first within each byte, in component order;
//! components beyond the logical dimension up to the padded boundary are
//! zero-filled. The bit order is an internal contract of this module: the
//! packer and unpacker are the only two places that know it.

/// Packing block width in bits.
pub const PACK_BLOCK: usize = 64;

/// Round `dims` up to the next multiple of `block`.
///
/// Idempotent: `discretize(discretize(d, b), b) == discretize(d, b)`.
pub fn discretize(dims: usize, block: usize) -> usize {
    dims.div_ceil(block) * block
}

/// Byte length of a packed 1-bit code for `dims` components.
pub fn packed_len(dims: usize) -> usize {
    discretize(dims, PACK_BLOCK) / 8
}

/// Pack per-component 1-bit codes (values 0 or 1) into `out`.
///
/// `out` must be exactly `packed_len(code.len())` bytes and is fully
/// overwritten, including the zero padding.
pub fn pack_binary(code: &[u8], out: &mut [u8]) {
    debug_assert_eq!(out.len(), packed_len(code.len()));
    out.fill(0);
    for (i, &bit) in code.iter().enumerate() {
        debug_assert!(bit <= 1);
        out[i / 8] |= bit << (7 - i % 8);
    }
}

/// Unpack a binary code back into per-component 0/1 values.
///
/// Exact inverse of [`pack_binary`] over the logical `dims` components.
pub fn unpack_binary(packed: &[u8], dims: usize, out: &mut [u8]) {
    debug_assert!(packed.len() >= packed_len(dims));
    debug_assert_eq!(out.len(), dims);
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = (packed[i / 8] >> (7 - i % 8)) & 1;
    }
}
