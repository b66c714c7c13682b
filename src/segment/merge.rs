//! Merge coordination for segment vector data.
//!
//! Quantized codes cannot simply be concatenated across segments: each input
//! was quantized against its own centroid, and a merged segment gets a new
//! centroid computed over the union of surviving vectors. Every survivor is
//! therefore re-quantized, which keeps corrective rescoring numerically
//! consistent for the whole merged segment at the cost of re-reading raw
//! vectors.

use std::path::Path;

use roaring::RoaringBitmap;
use tracing::info;

use crate::config::FieldConfig;
use crate::error::Result;
use crate::segment::reader::SegmentReader;
use crate::segment::types::SegmentFiles;
use crate::segment::writer::SegmentWriter;

/// One input segment: its reader plus the ordinals deleted since flush.
pub struct MergeInput<'a> {
    pub reader: &'a SegmentReader,
    pub deleted: Option<&'a RoaringBitmap>,
}

/// Rewrites surviving vectors from a set of input segments into one new
/// segment. Single-writer per target segment, enforced by the indexing layer.
pub struct MergeCoordinator {
    config: FieldConfig,
}

impl MergeCoordinator {
    pub fn new(config: FieldConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Merge `inputs` into `<dir>/<name>.{vec,veb}`.
    ///
    /// Raw vectors are read through each input's merge instance:
    /// conventional mapped strategy, never direct I/O, since a merge is one
    /// large sequential pass. Survivors keep input-segment order, ascending
    /// ordinal within each input.
    pub fn merge(&self, inputs: &[MergeInput<'_>], dir: &Path, name: &str) -> Result<SegmentFiles> {
        let dim = self.config.dimension as usize;
        let mut writer = SegmentWriter::new(self.config.clone())?;
        let mut row = vec![0.0f32; dim];

        for input in inputs {
            let reader = input.reader.merge_instance()?;
            for ord in reader.ordinals(input.deleted) {
                reader.read_raw_vector(ord, &mut row)?;
                writer.add_vector(&row)?;
            }
        }

        let files = writer.flush(dir, name)?;
        info!(
            name,
            inputs = inputs.len(),
            survivors = writer.vector_count(),
            "merged segment vector data"
        );
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RawIoStrategy, VectorSimilarity};
    use crate::segment::types::RegionAccess;
    use tempfile::TempDir;

    fn test_config(dim: u32) -> FieldConfig {
        FieldConfig {
            dimension: dim,
            similarity: VectorSimilarity::Euclidean,
            bits_per_component: 1,
            raw_io: RawIoStrategy::Buffered,
        }
    }

    fn write_segment(
        dir: &TempDir,
        config: &FieldConfig,
        name: &str,
        rows: &[Vec<f32>],
    ) -> SegmentFiles {
        let mut writer = SegmentWriter::new(config.clone()).unwrap();
        for row in rows {
            writer.add_vector(row).unwrap();
        }
        writer.flush(dir.path(), name).unwrap()
    }

    #[test]
    fn test_merge_drops_deleted_and_reorders() {
        let dir = TempDir::new().unwrap();
        let config = test_config(2);

        let rows_a: Vec<Vec<f32>> = vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![2.0, 2.0]];
        let rows_b: Vec<Vec<f32>> = vec![vec![10.0, 10.0], vec![20.0, 20.0]];
        let files_a = write_segment(&dir, &config, "a", &rows_a);
        let files_b = write_segment(&dir, &config, "b", &rows_b);

        let reader_a =
            SegmentReader::open(files_a, config.clone(), RegionAccess::SearchAccess).unwrap();
        let reader_b =
            SegmentReader::open(files_b, config.clone(), RegionAccess::SearchAccess).unwrap();

        let mut deleted_a = RoaringBitmap::new();
        deleted_a.insert(1); // drop [1.0, 1.0]

        let coordinator = MergeCoordinator::new(config.clone()).unwrap();
        let merged_files = coordinator
            .merge(
                &[
                    MergeInput {
                        reader: &reader_a,
                        deleted: Some(&deleted_a),
                    },
                    MergeInput {
                        reader: &reader_b,
                        deleted: None,
                    },
                ],
                dir.path(),
                "merged",
            )
            .unwrap();

        let merged =
            SegmentReader::open(merged_files, config, RegionAccess::SearchAccess).unwrap();
        assert_eq!(merged.vector_count(), 4);

        let mut row = vec![0.0f32; 2];
        merged.read_raw_vector(0, &mut row).unwrap();
        assert_eq!(row, vec![0.0, 0.0]);
        merged.read_raw_vector(1, &mut row).unwrap();
        assert_eq!(row, vec![2.0, 2.0]);
        merged.read_raw_vector(2, &mut row).unwrap();
        assert_eq!(row, vec![10.0, 10.0]);
        merged.read_raw_vector(3, &mut row).unwrap();
        assert_eq!(row, vec![20.0, 20.0]);

        // New centroid is the mean of the four survivors
        assert!((merged.centroid()[0] - 8.0).abs() < 1e-5);
    }
}
