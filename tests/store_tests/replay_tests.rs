//! Tests for applying logged operation records
//!
//! These tests verify:
//! - Records are applied without primary-side existence checks
//! - Records at or below the checkpoint LSN, or already applied, are skipped
//! - Operations without a data effect are accepted and ignored
//! - Records survive encode/decode before being applied

use tempfile::TempDir;
use tstore::{OperationRecord, StoreError, StoreOperation};

use crate::{checkpoint, persisted_store, value, volatile_store};

#[test]
fn test_apply_add_and_remove() {
    let store = volatile_store();

    assert!(store.apply(&OperationRecord::add(&1u64, &value("a")).unwrap(), 1).unwrap());
    assert_eq!(store.get(&1).unwrap(), Some(value("a")));

    assert!(store.apply(&OperationRecord::remove(&1u64).unwrap(), 2).unwrap());
    assert_eq!(store.get(&1).unwrap(), None);
    assert!(store.read(&1).unwrap().is_tombstone());
}

#[test]
fn test_apply_update_creates_missing_key() {
    let store = volatile_store();
    let record = OperationRecord::update(&5u64, &value("v")).unwrap();
    assert!(store.apply(&record, 3).unwrap());

    let result = store.read(&5).unwrap();
    assert_eq!(result.value(), Some(&value("v")));
    assert_eq!(result.version_sequence_number(), Some(3));
}

#[test]
fn test_apply_twice_is_skipped() {
    let store = volatile_store();
    let record = OperationRecord::add(&1u64, &value("a")).unwrap();
    assert!(store.apply(&record, 4).unwrap());
    assert!(!store.apply(&record, 4).unwrap());
    assert_eq!(store.differential_versions(&1).len(), 1);
}

#[test]
fn test_apply_below_checkpoint_is_skipped() {
    let dir = TempDir::new().unwrap();
    let store = persisted_store(dir.path());
    store.add(1, value("a"), 1).unwrap();
    checkpoint(&store, 10);

    let record = OperationRecord::update(&1u64, &value("stale")).unwrap();
    assert!(!store.apply(&record, 8).unwrap());
    assert!(!store.apply(&record, 10).unwrap());
    assert_eq!(store.get(&1).unwrap(), Some(value("a")));

    assert!(store.apply(&record, 11).unwrap());
    assert_eq!(store.get(&1).unwrap(), Some(value("stale")));
}

#[test]
fn test_apply_after_decode() {
    let store = volatile_store();
    let record = OperationRecord::partial_update(&9u64, &value("p")).unwrap();
    let decoded = OperationRecord::decode(&record.encode()).unwrap();
    assert_eq!(decoded, record);

    assert!(store.apply(&decoded, 1).unwrap());
    assert_eq!(store.get(&9).unwrap(), Some(value("p")));
}

#[test]
fn test_apply_clear() {
    let store = volatile_store();
    store.add(1, value("a"), 1).unwrap();
    store.add(2, value("b"), 2).unwrap();

    assert!(store.apply(&OperationRecord::clear(), 3).unwrap());
    assert!(store.is_empty().unwrap());
}

#[test]
fn test_apply_operations_without_data_effect() {
    let store = volatile_store();
    for operation in [
        StoreOperation::Get,
        StoreOperation::Checkpoint,
        StoreOperation::Copy,
        StoreOperation::Pause,
    ] {
        let record = OperationRecord::without_payload(operation);
        assert!(!store.apply(&record, 1).unwrap());
    }
    assert_eq!(store.last_sequence_number(), tstore::INVALID_LSN);
}

#[test]
fn test_apply_record_without_key() {
    let store = volatile_store();
    let record = OperationRecord::without_payload(StoreOperation::Add);
    assert!(matches!(
        store.apply(&record, 1),
        Err(StoreError::Corruption(_))
    ));
}

#[test]
fn test_apply_while_paused() {
    let store = volatile_store();
    store.pause();
    let record = OperationRecord::add(&1u64, &value("a")).unwrap();
    assert!(matches!(store.apply(&record, 1), Err(StoreError::Paused)));
}

#[test]
fn test_apply_keeps_ttl() {
    let dir = TempDir::new().unwrap();
    let store = persisted_store(dir.path());

    let record = OperationRecord::add(&1u64, &value("a")).unwrap().with_ttl(5000);
    let decoded = OperationRecord::decode(&record.encode()).unwrap();
    assert!(store.apply(&decoded, 1).unwrap());

    let result = store.read(&1).unwrap();
    assert_eq!(result.item().unwrap().ttl(), Some(5000));

    // The ttl is carried into the checkpoint file
    checkpoint(&store, 1);
    assert_eq!(store.read(&1).unwrap().item().unwrap().ttl(), Some(5000));
}

#[test]
fn test_apply_update_with_ttl_matches_primary() {
    let primary = volatile_store();
    let secondary = volatile_store();

    primary.add(1, value("a"), 1).unwrap();
    primary.update_with_ttl(1, value("b"), 60, 2, None).unwrap();

    secondary.apply(&OperationRecord::add(&1u64, &value("a")).unwrap(), 1).unwrap();
    let update = OperationRecord::update(&1u64, &value("b")).unwrap().with_ttl(60);
    secondary.apply(&update, 2).unwrap();

    let expected = primary.read(&1).unwrap();
    let replayed = secondary.read(&1).unwrap();
    assert_eq!(replayed.value(), expected.value());
    assert_eq!(replayed.item().unwrap().ttl(), Some(60));
    assert_eq!(expected.item().unwrap().ttl(), Some(60));
}

#[test]
fn test_apply_without_ttl_stores_none() {
    let store = volatile_store();
    store.apply(&OperationRecord::add(&1u64, &value("a")).unwrap(), 1).unwrap();
    assert_eq!(store.read(&1).unwrap().item().unwrap().ttl(), None);
}
