//! Process-wide scorer kernel selection.
//!
//! The CPU's vector-instruction capability is probed exactly once, the first
//! time any scorer asks for a kernel; every caller shares that selection for
//! the process lifetime. Whether the SIMD kernel is actually used for a given
//! segment additionally depends on the reader exposing a contiguous mapped
//! region; that check lives with the scorer, not here.

use std::sync::OnceLock;

use tracing::debug;

/// The two kernel families. Functionally equivalent; `Simd` processes 32-byte
/// blocks with AVX2, `Scalar` works a `u64` word at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kernel {
    Simd,
    Scalar,
}

static SELECTED: OnceLock<Kernel> = OnceLock::new();

/// The kernel selected for this process.
pub fn kernel() -> Kernel {
    *SELECTED.get_or_init(|| {
        let selected = detect();
        debug!(?selected, "quantized scorer kernel selected");
        selected
    })
}

fn detect() -> Kernel {
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("avx2") {
            return Kernel::Simd;
        }
    }
    Kernel::Scalar
}

impl Kernel {
    /// Inner product of two packed 1-bit codes: `popcount(a AND b)`.
    ///
    /// Both buffers must have equal length, a multiple of 8 bytes; the
    /// packer's 64-bit discretization guarantees this.
    pub fn and_popcount(self, a: &[u8], b: &[u8]) -> u32 {
        debug_assert_eq!(a.len(), b.len());
        debug_assert_eq!(a.len() % 8, 0);
        match self {
            #[cfg(target_arch = "x86_64")]
            Kernel::Simd => unsafe { and_popcount_avx2(a, b) },
            #[cfg(not(target_arch = "x86_64"))]
            Kernel::Simd => and_popcount_scalar(a, b),
            Kernel::Scalar => and_popcount_scalar(a, b),
        }
    }
}

/// One AND + POPCNT per u64 word.
fn and_popcount_scalar(a: &[u8], b: &[u8]) -> u32 {
    let mut count = 0u32;
    for (wa, wb) in a.chunks_exact(8).zip(b.chunks_exact(8)) {
        let wa = u64::from_le_bytes(wa.try_into().unwrap());
        let wb = u64::from_le_bytes(wb.try_into().unwrap());
        count += (wa & wb).count_ones();
    }
    count
}

/// AVX2 nibble-LUT popcount (vpshufb) over 32-byte blocks, widened through
/// vpsadbw; sub-block tail falls back to u64 words.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn and_popcount_avx2(a: &[u8], b: &[u8]) -> u32 {
    use std::arch::x86_64::*;

    let chunks = a.len() / 32;
    let low_mask = _mm256_set1_epi8(0x0f);
    let lookup = _mm256_setr_epi8(
        0, 1, 1, 2, 1, 2, 2, 3, 1, 2, 2, 3, 2, 3, 3, 4, 0, 1, 1, 2, 1, 2, 2, 3, 1, 2, 2, 3, 2, 3,
        3, 4,
    );

    let mut total = _mm256_setzero_si256();
    for i in 0..chunks {
        let av = _mm256_loadu_si256(a.as_ptr().add(i * 32) as *const __m256i);
        let bv = _mm256_loadu_si256(b.as_ptr().add(i * 32) as *const __m256i);
        let anded = _mm256_and_si256(av, bv);

        let lo = _mm256_and_si256(anded, low_mask);
        let hi = _mm256_and_si256(_mm256_srli_epi16(anded, 4), low_mask);
        let counts = _mm256_add_epi8(
            _mm256_shuffle_epi8(lookup, lo),
            _mm256_shuffle_epi8(lookup, hi),
        );
        // Widen u8 counts to u64 lanes before accumulating
        total = _mm256_add_epi64(total, _mm256_sad_epu8(counts, _mm256_setzero_si256()));
    }

    let mut lanes = [0i64; 4];
    _mm256_storeu_si256(lanes.as_mut_ptr() as *mut __m256i, total);
    let mut sum = (lanes[0] + lanes[1] + lanes[2] + lanes[3]) as u32;

    sum += and_popcount_scalar(&a[chunks * 32..], &b[chunks * 32..]);
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_scalar_and_popcount() {
        let a = [0xFFu8, 0x00, 0xF0, 0x0F, 0xAA, 0x55, 0xFF, 0xFF];
        let b = [0xFFu8, 0xFF, 0x0F, 0x0F, 0xAA, 0xAA, 0x00, 0x01];
        // 8 + 0 + 0 + 4 + 4 + 0 + 0 + 1
        assert_eq!(and_popcount_scalar(&a, &b), 17);
    }

    #[test]
    fn test_kernels_agree() {
        let mut rng = StdRng::seed_from_u64(9);
        for &len in &[8usize, 16, 32, 40, 128, 512] {
            let a: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let b: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            assert_eq!(
                Kernel::Scalar.and_popcount(&a, &b),
                kernel().and_popcount(&a, &b),
                "kernel mismatch at len={len}"
            );
        }
    }

    #[test]
    fn test_selection_is_stable() {
        assert_eq!(kernel(), kernel());
    }
}
