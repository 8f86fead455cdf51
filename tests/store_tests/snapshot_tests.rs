//! Tests for snapshot reads and garbage collection
//!
//! These tests verify:
//! - A snapshot keeps seeing the versions current when it was taken
//! - Garbage collection keeps every version a live snapshot can see
//! - Dropping the last snapshot lets superseded versions go

use tempfile::TempDir;

use crate::{checkpoint, persisted_store, value, volatile_store};

#[test]
fn test_snapshot_sees_old_versions() {
    let store = volatile_store();
    store.add(1, value("a"), 1).unwrap();
    store.add(2, value("x"), 2).unwrap();

    let snapshot = store.snapshot().unwrap();
    assert_eq!(snapshot.sequence_number(), 2);

    store.update(1, value("b"), 3, None).unwrap();
    store.remove(2, 4, None).unwrap();
    store.add(3, value("new"), 5).unwrap();

    assert_eq!(snapshot.get(&1).unwrap(), Some(value("a")));
    assert_eq!(store.get_at(&2, &snapshot).unwrap(), Some(value("x")));
    assert_eq!(snapshot.get(&3).unwrap(), None);
    assert_eq!(
        snapshot.entries().unwrap(),
        vec![(1, value("a")), (2, value("x"))]
    );

    assert_eq!(store.get(&1).unwrap(), Some(value("b")));
    assert_eq!(store.get(&2).unwrap(), None);
}

#[test]
fn test_snapshot_across_checkpoint() {
    let dir = TempDir::new().unwrap();
    let store = persisted_store(dir.path());
    store.add(1, value("a"), 1).unwrap();
    let snapshot = store.snapshot().unwrap();

    store.update(1, value("b"), 2, None).unwrap();
    checkpoint(&store, 2);
    store.update(1, value("c"), 3, None).unwrap();

    assert_eq!(snapshot.get(&1).unwrap(), Some(value("a")));
    assert_eq!(store.get(&1).unwrap(), Some(value("c")));
}

#[test]
fn test_snapshot_registration() {
    let store = volatile_store();
    assert_eq!(store.active_snapshot_count(), 0);

    let first = store.snapshot().unwrap();
    let second = store.snapshot().unwrap();
    assert_eq!(store.active_snapshot_count(), 2);

    drop(first);
    assert_eq!(store.active_snapshot_count(), 1);
    drop(second);
    assert_eq!(store.active_snapshot_count(), 0);
}

#[test]
fn test_gc_without_snapshots() {
    let store = volatile_store();
    store.add(1, value("a"), 1).unwrap();
    store.update(1, value("b"), 2, None).unwrap();
    store.update(1, value("c"), 3, None).unwrap();

    assert_eq!(store.collect_garbage(), 2);
    assert_eq!(store.differential_versions(&1).len(), 1);
    assert_eq!(store.get(&1).unwrap(), Some(value("c")));
}

#[test]
fn test_gc_keeps_snapshot_versions() {
    let store = volatile_store();
    store.add(1, value("a"), 1).unwrap();
    store.update(1, value("b"), 2, None).unwrap();

    let snapshot = store.snapshot().unwrap();
    store.update(1, value("c"), 3, None).unwrap();

    // "a" ended at 2, invisible to a snapshot at 2; "b" is what it reads
    assert_eq!(store.collect_garbage(), 1);
    assert_eq!(snapshot.get(&1).unwrap(), Some(value("b")));
    assert_eq!(store.differential_versions(&1).len(), 2);

    drop(snapshot);
    assert_eq!(store.collect_garbage(), 1);
    assert_eq!(store.differential_versions(&1).len(), 1);
}

#[test]
fn test_gc_on_closed_store_is_harmless() {
    let store = volatile_store();
    store.add(1, value("a"), 1).unwrap();
    store.close().unwrap();
    assert_eq!(store.collect_garbage(), 0);
}
