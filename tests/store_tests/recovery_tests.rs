//! Tests for reopening a persisted store
//!
//! These tests verify:
//! - The last completed generation is recovered, nothing newer
//! - Interrupted metadata replaces are repaired
//! - Checkpoint files no generation references are deleted
//! - Corrupted state fails the open

use std::fs;

use tempfile::TempDir;
use tstore::checkpoint::{checkpoint_file_name, key_file_path, value_file_path};
use tstore::metadata::MetadataManager;
use tstore::{CancellationToken, StoreError, TStore};

use crate::{checkpoint, persisted_store, value, TestStore};

#[test]
fn test_reopen_recovers_checkpoint() {
    let dir = TempDir::new().unwrap();
    {
        let store = persisted_store(dir.path());
        store.add(1, value("a"), 1).unwrap();
        store.add_with_ttl(2, value("b"), 500, 2).unwrap();
        checkpoint(&store, 5);
        store.close().unwrap();
    }

    let store = persisted_store(dir.path());
    assert_eq!(store.checkpoint_lsn(), 5);
    assert_eq!(store.last_sequence_number(), 5);
    assert_eq!(store.file_count(), 1);
    assert_eq!(store.get(&1).unwrap(), Some(value("a")));
    assert_eq!(store.read(&2).unwrap().item().unwrap().ttl(), Some(500));
}

#[test]
fn test_unchecked_writes_not_recovered() {
    let dir = TempDir::new().unwrap();
    {
        let store = persisted_store(dir.path());
        store.add(1, value("a"), 1).unwrap();
        checkpoint(&store, 1);
        store.add(2, value("b"), 2).unwrap();
    }

    let store = persisted_store(dir.path());
    assert_eq!(store.get(&1).unwrap(), Some(value("a")));
    assert_eq!(store.get(&2).unwrap(), None);
}

#[test]
fn test_open_empty_folder() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("store");
    let store: TestStore = TStore::open_path(&path).unwrap();

    assert!(path.exists());
    assert_eq!(store.checkpoint_lsn(), tstore::INVALID_LSN);
    assert!(store.is_empty().unwrap());
}

#[test]
fn test_performed_but_not_completed_is_discarded() {
    let dir = TempDir::new().unwrap();
    {
        let store = persisted_store(dir.path());
        store.add(1, value("a"), 1).unwrap();
        checkpoint(&store, 1);
        store.update(1, value("b"), 2, None).unwrap();
        store.prepare_checkpoint(2).unwrap();
        store.perform_checkpoint(&CancellationToken::new()).unwrap();
        assert!(MetadataManager::temp_path(dir.path()).exists());
    }

    let store = persisted_store(dir.path());
    assert_eq!(store.checkpoint_lsn(), 1);
    assert_eq!(store.get(&1).unwrap(), Some(value("a")));
    assert!(!MetadataManager::temp_path(dir.path()).exists());
    assert!(!key_file_path(dir.path(), &checkpoint_file_name(2)).exists());
}

#[test]
fn test_interrupted_replace_restores_backup() {
    let dir = TempDir::new().unwrap();
    {
        let store = persisted_store(dir.path());
        store.add(1, value("a"), 1).unwrap();
        checkpoint(&store, 1);
    }

    // Crash after current was moved aside, before temp took its place
    fs::rename(
        MetadataManager::current_path(dir.path()),
        MetadataManager::backup_path(dir.path()),
    )
    .unwrap();

    let store = persisted_store(dir.path());
    assert_eq!(store.checkpoint_lsn(), 1);
    assert_eq!(store.get(&1).unwrap(), Some(value("a")));
    assert!(MetadataManager::current_path(dir.path()).exists());
    assert!(!MetadataManager::backup_path(dir.path()).exists());
}

#[test]
fn test_orphan_files_deleted() {
    let dir = TempDir::new().unwrap();
    {
        let store = persisted_store(dir.path());
        store.add(1, value("a"), 1).unwrap();
        checkpoint(&store, 1);
    }

    let orphan = checkpoint_file_name(99);
    fs::write(key_file_path(dir.path(), &orphan), b"junk").unwrap();
    fs::write(value_file_path(dir.path(), &orphan), b"junk").unwrap();

    let store = persisted_store(dir.path());
    assert!(!key_file_path(dir.path(), &orphan).exists());
    assert!(!value_file_path(dir.path(), &orphan).exists());
    assert!(key_file_path(dir.path(), &checkpoint_file_name(1)).exists());

    // New files never reuse an id seen on disk
    store.add(2, value("b"), 2).unwrap();
    checkpoint(&store, 2);
    assert_eq!(store.metadata_table().files()[0].file_id(), 100);
}

#[test]
fn test_stale_staging_removed() {
    let dir = TempDir::new().unwrap();
    let staging = dir.path().join(tstore::store::COPY_STAGING_DIR);
    fs::create_dir_all(&staging).unwrap();
    fs::write(staging.join("partial.sfk"), b"partial").unwrap();

    let _store = persisted_store(dir.path());
    assert!(!staging.exists());
}

#[test]
fn test_corrupted_metadata_fails_open() {
    let dir = TempDir::new().unwrap();
    {
        let store = persisted_store(dir.path());
        store.add(1, value("a"), 1).unwrap();
        checkpoint(&store, 1);
    }

    let path = MetadataManager::current_path(dir.path());
    let mut bytes = fs::read(&path).unwrap();
    bytes[8] ^= 0xFF;
    fs::write(&path, bytes).unwrap();

    let result: Result<TestStore, _> = TStore::open_path(dir.path());
    assert!(matches!(result, Err(StoreError::Corruption(_))));
}

#[test]
fn test_missing_checkpoint_file_fails_open() {
    let dir = TempDir::new().unwrap();
    {
        let store = persisted_store(dir.path());
        store.add(1, value("a"), 1).unwrap();
        checkpoint(&store, 1);
    }

    fs::remove_file(value_file_path(dir.path(), &checkpoint_file_name(1))).unwrap();
    let result: Result<TestStore, _> = TStore::open_path(dir.path());
    assert!(result.is_err());
}
