//! Tests for MetadataManager
//!
//! These tests verify:
//! - Metadata files round-trip (LSN, file entries, sizes)
//! - Corrupted metadata files are rejected
//! - Safe replace leaves exactly one current file
//! - Recovery restores an interrupted replace and discards temp files

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;
use tstore::metadata::{
    FileMetadata, MetadataManager, MetadataTable, BACKUP_METADATA_FILE_NAME,
    CURRENT_METADATA_FILE_NAME, TEMP_METADATA_FILE_NAME,
};
use tstore::StoreError;

// =============================================================================
// Helper Functions
// =============================================================================

fn sample_table(dir: &TempDir, lsn: i64) -> Arc<MetadataTable> {
    let table = MetadataTable::with_checkpoint_lsn(lsn);
    table.add_file(Arc::new(FileMetadata::new(
        dir.path(),
        1,
        "checkpoint_000001",
        10,
        8,
        2,
        512,
        2048,
    )));
    table.add_file(Arc::new(FileMetadata::new(
        dir.path(),
        4,
        "checkpoint_000004",
        3,
        3,
        0,
        128,
        96,
    )));
    table
}

// =============================================================================
// Encode / Decode Tests
// =============================================================================

#[test]
fn test_write_then_open() {
    let dir = TempDir::new().unwrap();
    let table = sample_table(&dir, 42);
    let path = MetadataManager::current_path(dir.path());

    let size = MetadataManager::write(&table, &path, false).unwrap();
    assert_eq!(size, fs::metadata(&path).unwrap().len());
    assert_eq!(table.metadata_file_size(), size);

    let opened = MetadataManager::open(&path, dir.path()).unwrap();
    assert_eq!(opened.checkpoint_lsn(), 42);
    assert_eq!(opened.metadata_file_size(), size);
    assert_eq!(opened.file_count(), 2);

    let file = opened.file(4).unwrap();
    assert_eq!(file.file_name(), "checkpoint_000004");
    assert_eq!(file.total_number_of_entries(), 3);
    assert_eq!(file.number_of_valid_entries(), 3);
    assert_eq!(file.number_of_deleted_entries(), 0);
    assert_eq!(file.key_file_size(), 128);
    assert_eq!(file.value_file_size(), 96);
    assert_eq!(file.dir(), dir.path());
}

#[test]
fn test_decode_truncated() {
    let dir = TempDir::new().unwrap();
    let bytes = MetadataManager::encode(&sample_table(&dir, 1));

    let result = MetadataManager::decode(&bytes[..bytes.len() - 10], dir.path());
    assert!(matches!(result, Err(StoreError::Corruption(_))));
}

#[test]
fn test_empty_table_round_trip() {
    let dir = TempDir::new().unwrap();
    let bytes = MetadataManager::encode(&MetadataTable::with_checkpoint_lsn(42));

    // Header (magic, version, file count, lsn) and CRC footer only
    assert_eq!(bytes.len(), 18 + 4);

    let table = MetadataManager::decode(&bytes, dir.path()).unwrap();
    assert_eq!(table.checkpoint_lsn(), 42);
    assert_eq!(table.file_count(), 0);
    assert_eq!(table.metadata_file_size(), bytes.len() as u64);
}

#[test]
fn test_decode_flipped_byte() {
    let dir = TempDir::new().unwrap();
    let mut bytes = MetadataManager::encode(&MetadataTable::with_checkpoint_lsn(3));
    bytes[12] ^= 0xff;
    assert!(matches!(
        MetadataManager::decode(&bytes, dir.path()),
        Err(StoreError::Corruption(_))
    ));
}

#[test]
fn test_open_corrupted_file() {
    let dir = TempDir::new().unwrap();
    let path = MetadataManager::current_path(dir.path());
    MetadataManager::write(&sample_table(&dir, 1), &path, false).unwrap();

    let mut bytes = fs::read(&path).unwrap();
    bytes[12] ^= 0x01;
    fs::write(&path, bytes).unwrap();

    let result = MetadataManager::open(&path, dir.path());
    assert!(matches!(result, Err(StoreError::Corruption(_))));
}

// =============================================================================
// Safe Replace Tests
// =============================================================================

#[test]
fn test_safe_replace_swaps_files() {
    let dir = TempDir::new().unwrap();
    let current = MetadataManager::current_path(dir.path());
    let temp = MetadataManager::temp_path(dir.path());
    let backup = MetadataManager::backup_path(dir.path());

    MetadataManager::write(&sample_table(&dir, 1), &current, false).unwrap();
    MetadataManager::write(&sample_table(&dir, 2), &temp, false).unwrap();

    MetadataManager::safe_file_replace(&current, &temp, &backup).unwrap();

    assert!(!temp.exists());
    assert!(!backup.exists());
    let opened = MetadataManager::open(&current, dir.path()).unwrap();
    assert_eq!(opened.checkpoint_lsn(), 2);
}

#[test]
fn test_safe_replace_without_current() {
    let dir = TempDir::new().unwrap();
    let current = MetadataManager::current_path(dir.path());
    let temp = MetadataManager::temp_path(dir.path());
    let backup = MetadataManager::backup_path(dir.path());

    MetadataManager::write(&sample_table(&dir, 7), &temp, false).unwrap();
    MetadataManager::safe_file_replace(&current, &temp, &backup).unwrap();

    assert!(current.exists());
    assert!(!temp.exists());
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_recover_empty_dir() {
    let dir = TempDir::new().unwrap();
    assert_eq!(MetadataManager::recover_files(dir.path()).unwrap(), None);
}

#[test]
fn test_recover_restores_backup() {
    let dir = TempDir::new().unwrap();
    // Crash between "current → backup" and "temp → current"
    let backup = dir.path().join(BACKUP_METADATA_FILE_NAME);
    let temp = dir.path().join(TEMP_METADATA_FILE_NAME);
    MetadataManager::write(&sample_table(&dir, 5), &backup, false).unwrap();
    MetadataManager::write(&sample_table(&dir, 6), &temp, false).unwrap();

    let path = MetadataManager::recover_files(dir.path()).unwrap().unwrap();
    assert_eq!(path, dir.path().join(CURRENT_METADATA_FILE_NAME));
    assert!(!backup.exists());
    assert!(!temp.exists());

    let opened = MetadataManager::open(&path, dir.path()).unwrap();
    assert_eq!(opened.checkpoint_lsn(), 5);
}

#[test]
fn test_recover_prefers_current_over_backup() {
    let dir = TempDir::new().unwrap();
    let current = MetadataManager::current_path(dir.path());
    let backup = MetadataManager::backup_path(dir.path());
    MetadataManager::write(&sample_table(&dir, 9), &current, false).unwrap();
    MetadataManager::write(&sample_table(&dir, 8), &backup, false).unwrap();

    let path = MetadataManager::recover_files(dir.path()).unwrap().unwrap();
    assert_eq!(MetadataManager::open(&path, dir.path()).unwrap().checkpoint_lsn(), 9);
    assert!(!backup.exists());
}
