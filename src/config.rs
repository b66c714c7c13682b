use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{QuiverError, Result};

/// Similarity functions for vector fields
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorSimilarity {
    Euclidean,
    DotProduct,
    Cosine,
    MaxInnerProduct,
}

impl VectorSimilarity {
    /// Whether scoring needs the stored vector's centroid dot product as an
    /// extra correction term (anything that compares magnitudes across the
    /// centroid offset, i.e. every non-Euclidean similarity).
    pub fn needs_magnitude_correction(&self) -> bool {
        !matches!(self, VectorSimilarity::Euclidean)
    }

    pub(crate) fn to_code(self) -> u8 {
        match self {
            VectorSimilarity::Euclidean => 0,
            VectorSimilarity::DotProduct => 1,
            VectorSimilarity::Cosine => 2,
            VectorSimilarity::MaxInnerProduct => 3,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(VectorSimilarity::Euclidean),
            1 => Some(VectorSimilarity::DotProduct),
            2 => Some(VectorSimilarity::Cosine),
            3 => Some(VectorSimilarity::MaxInnerProduct),
            _ => None,
        }
    }
}

/// How the raw (full-precision) vector region is read at search time.
///
/// `Direct` bypasses the page cache so one-shot brute-force scans do not
/// evict hotter data; merges always read through the conventional mapped
/// path regardless of this setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawIoStrategy {
    Direct,
    Buffered,
}

/// Per-field vector configuration, supplied by the index template layer.
///
/// Immutable once a segment has been written with it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldConfig {
    pub dimension: u32,
    pub similarity: VectorSimilarity,
    pub bits_per_component: u8,
    pub raw_io: RawIoStrategy,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            dimension: 384, // Default for many embedding models
            similarity: VectorSimilarity::Cosine,
            bits_per_component: 1,
            raw_io: RawIoStrategy::Direct,
        }
    }
}

impl FieldConfig {
    /// Validate this configuration at index-creation time.
    ///
    /// Fails fast with `UnsupportedConfiguration` so a bad template never
    /// reaches the write path.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(QuiverError::UnsupportedConfiguration(
                "dimension must be at least 1".to_string(),
            ));
        }
        if self.bits_per_component != 1 {
            return Err(QuiverError::UnsupportedConfiguration(format!(
                "{} bits per component (only 1-bit quantization is implemented)",
                self.bits_per_component
            )));
        }
        Ok(())
    }

    /// Resolve the raw-region read strategy for segments under `dir`.
    ///
    /// Probes direct-I/O support once; filesystems without it (and non-unix
    /// targets) silently degrade to the buffered strategy instead of failing
    /// mid-search later.
    pub fn effective_raw_io(&self, dir: &Path) -> RawIoStrategy {
        match self.raw_io {
            RawIoStrategy::Buffered => RawIoStrategy::Buffered,
            RawIoStrategy::Direct => {
                if direct_io_supported(dir) {
                    RawIoStrategy::Direct
                } else {
                    tracing::warn!(
                        dir = %dir.display(),
                        "direct I/O unsupported, degrading raw vector reads to buffered"
                    );
                    RawIoStrategy::Buffered
                }
            }
        }
    }
}

/// Probe whether files under `dir` can be opened with `O_DIRECT`.
#[cfg(unix)]
pub(crate) fn direct_io_supported(dir: &Path) -> bool {
    use std::fs::OpenOptions;
    use std::os::unix::fs::OpenOptionsExt;

    let probe = dir.join(".dio_probe");
    if std::fs::write(&probe, b"probe").is_err() {
        return false;
    }
    let supported = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECT)
        .open(&probe)
        .is_ok();
    let _ = std::fs::remove_file(&probe);
    supported
}

#[cfg(not(unix))]
pub(crate) fn direct_io_supported(_dir: &Path) -> bool {
    false
}
