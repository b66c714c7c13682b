//! Segment merge behavior: centroid recomputation and re-quantization.

use quiver::vector::packing::{pack_binary, packed_len};
use quiver::{
    FieldConfig, MergeCoordinator, MergeInput, RawIoStrategy, RegionAccess, ScalarQuantizer,
    SegmentReader, SegmentWriter, VectorSimilarity,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use roaring::RoaringBitmap;
use tempfile::TempDir;

fn config(dim: u32, similarity: VectorSimilarity) -> FieldConfig {
    FieldConfig {
        dimension: dim,
        similarity,
        bits_per_component: 1,
        raw_io: RawIoStrategy::Buffered,
    }
}

fn random_rows(rng: &mut StdRng, count: usize, dim: usize, offset: f32) -> Vec<Vec<f32>> {
    (0..count)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0) + offset).collect())
        .collect()
}

fn build_segment(
    dir: &TempDir,
    config: &FieldConfig,
    name: &str,
    rows: &[Vec<f32>],
) -> SegmentReader {
    let mut writer = SegmentWriter::new(config.clone()).unwrap();
    for row in rows {
        writer.add_vector(row).unwrap();
    }
    let files = writer.flush(dir.path(), name).unwrap();
    SegmentReader::open(files, config.clone(), RegionAccess::SearchAccess).unwrap()
}

#[test]
fn test_merge_recomputes_centroid_and_requantizes() {
    let dir = TempDir::new().unwrap();
    let mut rng = StdRng::seed_from_u64(1234);
    let config = config(16, VectorSimilarity::Euclidean);

    // Distinct offsets give the two inputs clearly different centroids.
    let rows_a = random_rows(&mut rng, 50, 16, -2.0);
    let rows_b = random_rows(&mut rng, 50, 16, 2.0);
    let reader_a = build_segment(&dir, &config, "a", &rows_a);
    let reader_b = build_segment(&dir, &config, "b", &rows_b);

    let coordinator = MergeCoordinator::new(config.clone()).unwrap();
    let merged_files = coordinator
        .merge(
            &[
                MergeInput {
                    reader: &reader_a,
                    deleted: None,
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
    let merged = SegmentReader::open(merged_files, config.clone(), RegionAccess::SearchAccess)
        .unwrap();

    assert_eq!(merged.vector_count(), 100);

    // The merged centroid is a new value, not either input's.
    let differs = |a: &[f32], b: &[f32]| a.iter().zip(b).any(|(x, y)| (x - y).abs() > 1e-3);
    assert!(differs(merged.centroid(), reader_a.centroid()));
    assert!(differs(merged.centroid(), reader_b.centroid()));

    // Every surviving vector's stored code and corrections match a fresh
    // quantize call against the new centroid.
    let quantizer = ScalarQuantizer::new(VectorSimilarity::Euclidean);
    let dim = merged.dimension();
    let mut row = vec![0.0f32; dim];
    let mut code = vec![0u8; dim];
    let mut packed = vec![0u8; packed_len(dim)];
    for ord in 0..merged.vector_count() {
        merged.read_raw_vector(ord, &mut row).unwrap();
        let corrections = quantizer
            .quantize(&row, merged.centroid(), 1, &mut code)
            .unwrap();
        pack_binary(&code, &mut packed);

        assert_eq!(merged.code(ord), packed.as_slice(), "code mismatch at {ord}");
        assert_eq!(merged.corrections(ord), corrections);
    }
}

#[test]
fn test_merge_excludes_deleted_ordinals() {
    let dir = TempDir::new().unwrap();
    let mut rng = StdRng::seed_from_u64(4321);
    let config = config(8, VectorSimilarity::Euclidean);

    let rows_a = random_rows(&mut rng, 10, 8, 0.0);
    let rows_b = random_rows(&mut rng, 10, 8, 0.0);
    let reader_a = build_segment(&dir, &config, "a", &rows_a);
    let reader_b = build_segment(&dir, &config, "b", &rows_b);

    let mut deleted_a = RoaringBitmap::new();
    deleted_a.insert(0);
    deleted_a.insert(9);
    let mut deleted_b = RoaringBitmap::new();
    deleted_b.insert(5);

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
                    deleted: Some(&deleted_b),
                },
            ],
            dir.path(),
            "merged",
        )
        .unwrap();
    let merged =
        SegmentReader::open(merged_files, config, RegionAccess::SearchAccess).unwrap();

    assert_eq!(merged.vector_count(), 17);

    // Survivors keep input order: a[1..=8], then b[0..=4], b[6..=9].
    let mut row = vec![0.0f32; 8];
    merged.read_raw_vector(0, &mut row).unwrap();
    assert_eq!(row, rows_a[1]);
    merged.read_raw_vector(8, &mut row).unwrap();
    assert_eq!(row, rows_b[0]);
    merged.read_raw_vector(16, &mut row).unwrap();
    assert_eq!(row, rows_b[9]);
}

#[test]
fn test_merged_cosine_segment_keeps_unit_norms() {
    let dir = TempDir::new().unwrap();
    let mut rng = StdRng::seed_from_u64(555);
    let config = config(12, VectorSimilarity::Cosine);

    let rows_a: Vec<Vec<f32>> = random_rows(&mut rng, 20, 12, 0.5)
        .into_iter()
        .map(|row| row.into_iter().map(|v| v * 10.0).collect())
        .collect();
    let rows_b = random_rows(&mut rng, 20, 12, -0.5);
    let reader_a = build_segment(&dir, &config, "a", &rows_a);
    let reader_b = build_segment(&dir, &config, "b", &rows_b);

    let coordinator = MergeCoordinator::new(config.clone()).unwrap();
    let merged_files = coordinator
        .merge(
            &[
                MergeInput {
                    reader: &reader_a,
                    deleted: None,
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

    let mut row = vec![0.0f32; 12];
    for ord in 0..merged.vector_count() {
        merged.read_raw_vector(ord, &mut row).unwrap();
        let norm: f32 = row.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}
