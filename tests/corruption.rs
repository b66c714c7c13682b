//! Corrupt-segment detection at open time.

use quiver::{
    FieldConfig, RawIoStrategy, RegionAccess, SegmentFiles, SegmentReader, SegmentWriter,
    VectorSimilarity,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

fn write_segment(dir: &TempDir) -> (SegmentFiles, FieldConfig) {
    let config = FieldConfig {
        dimension: 8,
        similarity: VectorSimilarity::Euclidean,
        bits_per_component: 1,
        raw_io: RawIoStrategy::Buffered,
    };
    let mut rng = StdRng::seed_from_u64(8);
    let mut writer = SegmentWriter::new(config.clone()).unwrap();
    for _ in 0..20 {
        let row: Vec<f32> = (0..8).map(|_| rng.gen_range(-1.0..1.0)).collect();
        writer.add_vector(&row).unwrap();
    }
    let files = writer.flush(dir.path(), "seg").unwrap();
    (files, config)
}

fn open_err(files: SegmentFiles, config: FieldConfig) -> quiver::QuiverError {
    SegmentReader::open(files, config, RegionAccess::SearchAccess).unwrap_err()
}

#[test]
fn test_flipped_count_field_fails_checksum() {
    let dir = TempDir::new().unwrap();
    let (files, config) = write_segment(&dir);

    // The count field sits at offset 12 of the quantized header.
    let mut bytes = std::fs::read(&files.quantized_path).unwrap();
    bytes[12] ^= 0x01;
    std::fs::write(&files.quantized_path, &bytes).unwrap();

    let err = open_err(files, config);
    assert!(err.is_corruption(), "expected CorruptSegment, got {err}");
}

#[test]
fn test_consistent_but_wrong_count_fails_length_check() {
    let dir = TempDir::new().unwrap();
    let (files, config) = write_segment(&dir);

    // Rewrite count = 19 and recompute the CRC footer so the checksum alone
    // cannot catch it; the record-length consistency check must.
    let mut bytes = std::fs::read(&files.quantized_path).unwrap();
    bytes[12..16].copy_from_slice(&19u32.to_le_bytes());
    let payload_len = bytes.len() - 4;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&bytes[..payload_len]);
    let crc = hasher.finalize();
    bytes[payload_len..].copy_from_slice(&crc.to_le_bytes());
    std::fs::write(&files.quantized_path, &bytes).unwrap();

    let err = open_err(files, config);
    assert!(err.is_corruption(), "expected CorruptSegment, got {err}");
}

#[test]
fn test_truncated_raw_region() {
    let dir = TempDir::new().unwrap();
    let (files, config) = write_segment(&dir);

    let bytes = std::fs::read(&files.raw_path).unwrap();
    std::fs::write(&files.raw_path, &bytes[..bytes.len() - 16]).unwrap();

    let err = open_err(files, config);
    assert!(err.is_corruption(), "expected CorruptSegment, got {err}");
}

#[test]
fn test_wrong_magic() {
    let dir = TempDir::new().unwrap();
    let (files, config) = write_segment(&dir);

    let mut bytes = std::fs::read(&files.quantized_path).unwrap();
    bytes[0..4].copy_from_slice(b"JUNK");
    std::fs::write(&files.quantized_path, &bytes).unwrap();

    let err = open_err(files, config);
    assert!(err.is_corruption(), "expected CorruptSegment, got {err}");
}

#[test]
fn test_config_disagreement_is_corruption() {
    let dir = TempDir::new().unwrap();
    let (files, config) = write_segment(&dir);

    // Same files, different field configuration (wrong similarity).
    let other = FieldConfig {
        similarity: VectorSimilarity::Cosine,
        ..config
    };
    let err = open_err(files, other);
    assert!(err.is_corruption(), "expected CorruptSegment, got {err}");
}
