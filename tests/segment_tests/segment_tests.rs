//! Tests for log segments
//!
//! These tests verify:
//! - Writing and reading back sealed and unsealed segments
//! - Footer aggregates
//! - Torn-tail tolerance for unsealed segments
//! - Corruption detection for sealed segments and headers
//! - Crash recovery sealing

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use oplog::config::SyncStrategy;
use oplog::log::{
    encode_frame, seal_recovered_segment, LogEntry, LogIssue, LogReader, OperationType,
    ReadableSegment, SegmentHeader, SegmentState, TailDamage, WritableSegment, FORMAT_VERSION,
    SEGMENT_MAGIC,
};
use oplog::schema::{ColumnSchema, DataType, Schema};
use oplog::{LogError, OpId};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_path_buf();
    (temp_dir, path)
}

fn test_schema() -> Schema {
    Schema::new(vec![
        ColumnSchema::key("id", DataType::Int32),
        ColumnSchema::new("name", DataType::String).nullable(),
    ])
    .unwrap()
}

fn header(sequence_number: u64) -> SegmentHeader {
    SegmentHeader {
        tablet_id: "tablet-1".to_string(),
        sequence_number,
        schema: test_schema(),
        created_at_micros: 1_000,
    }
}

fn replicate(term: u64, index: u64) -> LogEntry {
    LogEntry::replicate(
        OpId::new(term, index),
        index * 10,
        OperationType::NoOp,
        vec![index as u8; 16],
    )
}

/// Write `count` replicates (1, 1..=count) into a new segment
fn write_segment(path: &Path, count: u64) -> (WritableSegment, Vec<u64>) {
    let mut segment = WritableSegment::create(path, header(1), SyncStrategy::EveryWrite).unwrap();
    let offsets = (1..=count)
        .map(|i| segment.append(&replicate(1, i)).unwrap())
        .collect();
    (segment, offsets)
}

fn flip_byte(path: &Path, offset: u64) {
    let mut data = fs::read(path).unwrap();
    data[offset as usize] ^= 0xFF;
    fs::write(path, data).unwrap();
}

fn truncate_by(path: &Path, bytes: u64) {
    let file = OpenOptions::new().write(true).open(path).unwrap();
    let len = file.metadata().unwrap().len();
    file.set_len(len - bytes).unwrap();
}

// =============================================================================
// Round-trip Tests
// =============================================================================

#[test]
fn test_empty_sealed_segment() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("wal-000000001");

    let (mut segment, _) = write_segment(&path, 0);
    segment.seal().unwrap();

    let readable = ReadableSegment::open(&path).unwrap();
    assert_eq!(readable.state(), SegmentState::Sealed);
    assert_eq!(readable.header(), &header(1));

    let footer = readable.footer().unwrap();
    assert_eq!(footer.num_entries, 0);
    assert_eq!(footer.min_op_id, None);
    assert_eq!(footer.max_op_id, None);
    assert!(readable.read_entries().unwrap().is_empty());
}

#[test]
fn test_single_entry_segment() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("wal-000000001");

    let (mut segment, _) = write_segment(&path, 1);
    segment.seal().unwrap();

    let readable = ReadableSegment::open(&path).unwrap();
    assert_eq!(readable.read_entries().unwrap(), vec![replicate(1, 1)]);

    let footer = readable.footer().unwrap();
    assert_eq!(footer.num_entries, 1);
    assert_eq!(footer.min_op_id, Some(OpId::new(1, 1)));
    assert_eq!(footer.max_op_id, Some(OpId::new(1, 1)));
}

#[test]
fn test_many_entries_segment() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("wal-000000001");

    let (mut segment, _) = write_segment(&path, 1000);
    segment.append(&LogEntry::commit(OpId::new(1, 1000))).unwrap();
    let written = segment.seal().unwrap();

    let readable = ReadableSegment::open(&path).unwrap();
    let entries = readable.read_entries().unwrap();
    assert_eq!(entries.len(), 1001);
    for (i, entry) in entries.iter().take(1000).enumerate() {
        assert_eq!(entry, &replicate(1, i as u64 + 1));
    }
    assert_eq!(entries[1000], LogEntry::commit(OpId::new(1, 1000)));

    let footer = readable.footer().unwrap();
    assert_eq!(footer, &written);
    assert_eq!(footer.num_entries, 1001);
    assert_eq!(footer.min_op_id, Some(OpId::new(1, 1)));
    assert_eq!(footer.max_op_id, Some(OpId::new(1, 1000)));
}

#[test]
fn test_unsealed_segment_reads_without_footer() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("wal-000000001");

    let (_segment, _) = write_segment(&path, 5);

    let readable = ReadableSegment::open(&path).unwrap();
    assert_eq!(readable.state(), SegmentState::Writable);
    assert!(!readable.has_footer());

    let scan = readable.scan().unwrap();
    assert_eq!(scan.entries.len(), 5);
    assert_eq!(scan.tail_damage, None);
}

#[test]
fn test_unsealed_handle_reads_after_seal() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("wal-000000001");

    let (mut segment, _) = write_segment(&path, 3);
    let readable = ReadableSegment::open(&path).unwrap();
    segment.seal().unwrap();

    // Opened before the seal: the footer bytes must not be read as a frame
    let scan = readable.scan().unwrap();
    assert_eq!(scan.entries.len(), 3);
    assert_eq!(scan.tail_damage, None);
}

#[test]
fn test_read_entry_at_offsets() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("wal-000000001");

    let (mut segment, offsets) = write_segment(&path, 10);
    segment.seal().unwrap();

    let readable = ReadableSegment::open(&path).unwrap();
    for (i, offset) in offsets.iter().enumerate() {
        assert_eq!(
            readable.read_entry_at(*offset).unwrap(),
            replicate(1, i as u64 + 1)
        );
    }

    let result = readable.read_entry_at(0);
    assert!(matches!(result, Err(LogError::InvalidArgument(_))));
}

// =============================================================================
// Writer Contract Tests
// =============================================================================

#[test]
fn test_append_after_seal_fails() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("wal-000000001");

    let (mut segment, _) = write_segment(&path, 1);
    segment.seal().unwrap();

    let result = segment.append(&replicate(1, 2));
    assert!(matches!(result, Err(LogError::IllegalState(_))));

    let result = segment.seal();
    assert!(matches!(result, Err(LogError::IllegalState(_))));
}

#[test]
fn test_replicate_ids_must_increase() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("wal-000000001");

    let (mut segment, _) = write_segment(&path, 3);

    let result = segment.append(&replicate(1, 3));
    assert!(matches!(result, Err(LogError::IllegalState(_))));

    // COMMITs are not ordered against replicates
    segment.append(&LogEntry::commit(OpId::new(1, 1))).unwrap();
    segment.append(&replicate(2, 1)).unwrap();
    assert_eq!(segment.last_replicate(), Some(OpId::new(2, 1)));
}

#[test]
fn test_create_refuses_existing_file() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("wal-000000001");

    let _first = write_segment(&path, 1);
    let result = WritableSegment::create(&path, header(1), SyncStrategy::EveryWrite);
    assert!(matches!(result, Err(LogError::Io(_))));
}

// =============================================================================
// Damage Tests
// =============================================================================

#[test]
fn test_truncated_tail_is_tolerated() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("wal-000000001");

    let (_segment, offsets) = write_segment(&path, 5);
    truncate_by(&path, 3);

    let readable = ReadableSegment::open(&path).unwrap();
    let scan = readable.scan().unwrap();
    assert_eq!(scan.entries.len(), 4);
    assert_eq!(scan.end_offset, offsets[4]);
    assert!(matches!(
        scan.tail_damage,
        Some(TailDamage::Truncated { offset, .. }) if offset == offsets[4]
    ));
}

#[test]
fn test_checksum_failure_in_unsealed_tail() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("wal-000000001");

    let (_segment, offsets) = write_segment(&path, 5);
    flip_byte(&path, offsets[4] + 2);

    let readable = ReadableSegment::open(&path).unwrap();
    let scan = readable.scan().unwrap();
    assert_eq!(scan.entries.len(), 4);
    assert_eq!(
        scan.tail_damage,
        Some(TailDamage::ChecksumMismatch { offset: offsets[4] })
    );
}

#[test]
fn test_checksum_failure_in_sealed_segment() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("wal-000000001");

    let (mut segment, offsets) = write_segment(&path, 5);
    segment.seal().unwrap();
    flip_byte(&path, offsets[2] + 2);

    let readable = ReadableSegment::open(&path).unwrap();
    assert_eq!(readable.state(), SegmentState::Sealed);

    let result = readable.read_entries();
    match result {
        Err(LogError::CorruptEntry { offset, .. }) => assert_eq!(offset, offsets[2]),
        other => panic!("expected CorruptEntry, got {other:?}"),
    }
}

#[test]
fn test_zero_filled_tail() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("wal-000000001");

    let (_segment, _) = write_segment(&path, 3);
    let end = fs::metadata(&path).unwrap().len();
    OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(end + 64)
        .unwrap();

    let readable = ReadableSegment::open(&path).unwrap();
    let scan = readable.scan().unwrap();
    assert_eq!(scan.entries.len(), 3);
    assert_eq!(scan.tail_damage, Some(TailDamage::ZeroFilled { offset: end }));
}

#[test]
fn test_valid_checksum_with_garbage_payload_is_corrupt() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("wal-000000001");

    let (_segment, _) = write_segment(&path, 2);
    let end = fs::metadata(&path).unwrap().len();
    let mut data = fs::read(&path).unwrap();
    data.extend_from_slice(&encode_frame(&[0xFF; 8]));
    fs::write(&path, data).unwrap();

    let readable = ReadableSegment::open(&path).unwrap();
    match readable.scan() {
        Err(LogError::CorruptEntry { offset, .. }) => assert_eq!(offset, end),
        other => panic!("expected CorruptEntry, got {other:?}"),
    }
}

#[test]
fn test_corrupt_header() {
    let (_temp, dir) = setup_temp_dir();

    let garbage = dir.join("wal-000000001");
    fs::write(&garbage, b"NOT A SEGMENT FILE").unwrap();
    let result = ReadableSegment::open(&garbage);
    assert!(matches!(result, Err(LogError::CorruptHeader { .. })));
    assert!(result.unwrap_err().is_corruption());

    let short = dir.join("wal-000000002");
    fs::write(&short, b"OPL").unwrap();
    let result = ReadableSegment::open(&short);
    assert!(matches!(result, Err(LogError::CorruptHeader { .. })));

    // Valid magic, unknown version
    let versioned = dir.join("wal-000000003");
    let (_segment, _) = write_segment(&versioned, 1);
    let mut data = fs::read(&versioned).unwrap();
    data[4] = 99;
    fs::write(&versioned, data).unwrap();
    let result = ReadableSegment::open(&versioned);
    assert!(matches!(result, Err(LogError::CorruptHeader { .. })));
}

#[test]
fn test_header_length_past_u64_range_is_corrupt() {
    let (_temp, dir) = setup_temp_dir();

    // Valid preamble followed by a 10-byte varint decoding to u64::MAX
    let path = dir.join("wal-000000001");
    let mut data = SEGMENT_MAGIC.to_vec();
    data.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    data.extend_from_slice(&[0xFF; 9]);
    data.push(0x01);
    fs::write(&path, &data).unwrap();

    let result = ReadableSegment::open(&path);
    assert!(matches!(result, Err(LogError::CorruptHeader { .. })));

    let reader = LogReader::open(&dir).unwrap();
    assert_eq!(reader.num_segments(), 0);
    assert!(matches!(
        reader.issues(),
        [LogIssue::CorruptHeader { path: issue_path, .. }] if issue_path == &path
    ));
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_rebuild_footer_matches_written_footer() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("wal-000000001");

    let (mut segment, _) = write_segment(&path, 10);
    let rebuilt = ReadableSegment::open(&path).unwrap().rebuild_footer().unwrap();
    let written = segment.seal().unwrap();

    assert_eq!(rebuilt.num_entries, written.num_entries);
    assert_eq!(rebuilt.min_op_id, written.min_op_id);
    assert_eq!(rebuilt.max_op_id, written.max_op_id);
    assert_eq!(rebuilt.total_entry_bytes, written.total_entry_bytes);
    assert_eq!(rebuilt.closed_at_micros, 0);
}

#[test]
fn test_seal_recovered_segment_cuts_damaged_tail() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("wal-000000001");

    let (segment, _) = write_segment(&path, 5);
    drop(segment);
    truncate_by(&path, 3);

    let crashed = ReadableSegment::open(&path).unwrap();
    let footer = seal_recovered_segment(&crashed).unwrap();
    assert_eq!(footer.num_entries, 4);
    assert_eq!(footer.max_op_id, Some(OpId::new(1, 4)));

    let reopened = ReadableSegment::open(&path).unwrap();
    assert_eq!(reopened.state(), SegmentState::Sealed);
    assert_eq!(reopened.footer(), Some(&footer));
    assert_eq!(reopened.read_entries().unwrap().len(), 4);

    let result = seal_recovered_segment(&reopened);
    assert!(matches!(result, Err(LogError::IllegalState(_))));
}
