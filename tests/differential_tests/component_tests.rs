//! Tests for DifferentialComponent
//!
//! These tests verify:
//! - Latest-version lookups and tombstones
//! - Version chains: superseded versions stay until pruned
//! - Replayed (not newer) writes are ignored
//! - Absorbing a newer component (double prepare)
//! - Pruning against the oldest active snapshot

use std::sync::Arc;
use std::thread;

use tstore::differential::DifferentialComponent;
use tstore::item::VersionedItem;

// =============================================================================
// Helper Functions
// =============================================================================

fn value_of(item: &VersionedItem<String>) -> Option<&str> {
    item.in_memory_value().map(|s| s.as_str())
}

// =============================================================================
// Lookup Tests
// =============================================================================

#[test]
fn test_add_and_get() {
    let component = DifferentialComponent::new();
    assert!(component.add(1u32, VersionedItem::inserted("a".to_string(), 10)));

    let item = component.get(&1).unwrap();
    assert_eq!(value_of(&item), Some("a"));
    assert_eq!(item.version_sequence_number(), 10);
    assert!(component.get(&2).is_none());
}

#[test]
fn test_update_keeps_previous_version() {
    let component = DifferentialComponent::new();
    component.add(1u32, VersionedItem::inserted("a".to_string(), 10));
    component.add(1u32, VersionedItem::updated("b".to_string(), 20));

    assert_eq!(value_of(&component.get(&1).unwrap()), Some("b"));

    let versions = component.versions(&1);
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].version_sequence_number(), 20);
    assert_eq!(versions[1].version_sequence_number(), 10);
    assert_eq!(versions[1].end_sequence_number(), Some(20));
    assert_eq!(versions[0].end_sequence_number(), None);
    assert_eq!(component.len(), 1);
    assert_eq!(component.version_count(), 2);
}

#[test]
fn test_tombstone_is_latest_version() {
    let component = DifferentialComponent::new();
    component.add(1u32, VersionedItem::inserted("a".to_string(), 10));
    component.add(1u32, VersionedItem::deleted(15));

    let item = component.get(&1).unwrap();
    assert!(item.is_deleted());
    assert!(component.contains_key(&1));
}

#[test]
fn test_replayed_write_ignored() {
    let component = DifferentialComponent::new();
    component.add(1u32, VersionedItem::inserted("a".to_string(), 10));

    assert!(!component.add(1u32, VersionedItem::updated("stale".to_string(), 10)));
    assert!(!component.add(1u32, VersionedItem::updated("older".to_string(), 5)));

    assert_eq!(value_of(&component.get(&1).unwrap()), Some("a"));
    assert_eq!(component.version_count(), 1);
}

#[test]
fn test_read_at_sequence_number() {
    let component = DifferentialComponent::new();
    component.add(1u32, VersionedItem::inserted("a".to_string(), 10));
    component.add(1u32, VersionedItem::updated("b".to_string(), 20));

    assert!(component.read_at(&1, 5).is_none());
    assert_eq!(value_of(&component.read_at(&1, 10).unwrap()), Some("a"));
    assert_eq!(value_of(&component.read_at(&1, 19).unwrap()), Some("a"));
    assert_eq!(value_of(&component.read_at(&1, 20).unwrap()), Some("b"));
}

#[test]
fn test_snapshot_sorted_latest() {
    let component = DifferentialComponent::new();
    for key in [5u32, 1, 3] {
        component.add(key, VersionedItem::inserted(key.to_string(), key as i64));
    }
    component.add(3u32, VersionedItem::updated("three".to_string(), 30));

    let snapshot = component.snapshot();
    let keys: Vec<u32> = snapshot.iter().map(|(k, _)| *k).collect();
    assert_eq!(keys, vec![1, 3, 5]);
    assert_eq!(value_of(&snapshot[1].1), Some("three"));

    let at_10 = component.snapshot_at(10);
    assert_eq!(value_of(&at_10[1].1), Some("3"));
    assert_eq!(component.max_sequence_number(), Some(30));
}

// =============================================================================
// Absorb Tests
// =============================================================================

#[test]
fn test_absorb_appends_newer_versions() {
    let older = DifferentialComponent::new();
    older.add(1u32, VersionedItem::inserted("a".to_string(), 10));
    older.add(2u32, VersionedItem::inserted("x".to_string(), 11));

    let newer = DifferentialComponent::new();
    newer.add(1u32, VersionedItem::updated("b".to_string(), 20));
    newer.add(3u32, VersionedItem::inserted("y".to_string(), 21));

    older.absorb(&newer);

    assert_eq!(older.len(), 3);
    assert_eq!(value_of(&older.get(&1).unwrap()), Some("b"));
    assert_eq!(older.versions(&1)[1].end_sequence_number(), Some(20));
    assert_eq!(value_of(&older.get(&3).unwrap()), Some("y"));
}

#[test]
fn test_absorb_replays_chain_oldest_first() {
    let older = DifferentialComponent::new();
    older.add(1u32, VersionedItem::inserted("a".to_string(), 10));

    let newer = DifferentialComponent::new();
    newer.add(1u32, VersionedItem::updated("b".to_string(), 20));
    newer.add(1u32, VersionedItem::updated("c".to_string(), 30));
    newer.add(2u32, VersionedItem::inserted("x".to_string(), 25));
    newer.add(2u32, VersionedItem::deleted(35));

    older.absorb(&newer);

    let versions = older.versions(&1);
    let values: Vec<_> = versions.iter().map(|v| value_of(v)).collect();
    assert_eq!(values, vec![Some("c"), Some("b"), Some("a")]);
    assert_eq!(versions[2].end_sequence_number(), Some(20));
    assert_eq!(versions[1].end_sequence_number(), Some(30));
    assert_eq!(versions[0].end_sequence_number(), None);

    let removed = older.versions(&2);
    assert_eq!(removed.len(), 2);
    assert!(removed[0].is_deleted());
    assert_eq!(value_of(&older.read_at(&2, 30).unwrap()), Some("x"));
}

// =============================================================================
// Prune Tests
// =============================================================================

#[test]
fn test_prune_without_snapshots_keeps_heads() {
    let component = DifferentialComponent::new();
    component.add(1u32, VersionedItem::inserted("a".to_string(), 10));
    component.add(1u32, VersionedItem::updated("b".to_string(), 20));
    component.add(1u32, VersionedItem::updated("c".to_string(), 30));

    assert_eq!(component.prune(None), 2);
    assert_eq!(component.version_count(), 1);
    assert_eq!(value_of(&component.get(&1).unwrap()), Some("c"));
}

#[test]
fn test_prune_keeps_versions_visible_to_snapshot() {
    let component = DifferentialComponent::new();
    component.add(1u32, VersionedItem::inserted("a".to_string(), 10));
    component.add(1u32, VersionedItem::updated("b".to_string(), 20));
    component.add(1u32, VersionedItem::updated("c".to_string(), 30));

    // A snapshot at 25 sees "b" (begin 20, end 30); "a" ended at 20
    assert_eq!(component.prune(Some(25)), 1);
    assert_eq!(value_of(&component.read_at(&1, 25).unwrap()), Some("b"));
    assert_eq!(component.version_count(), 2);
}

#[test]
fn test_clear_removes_everything() {
    let component = DifferentialComponent::new();
    component.add(1u32, VersionedItem::inserted("a".to_string(), 10));
    component.clear();
    assert!(component.is_empty());
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_readers_see_consistent_versions() {
    let component = Arc::new(DifferentialComponent::new());
    for key in 0..100u32 {
        component.add(key, VersionedItem::inserted(format!("v{}", key), key as i64 + 1));
    }

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let component = Arc::clone(&component);
            thread::spawn(move || {
                for key in 0..100u32 {
                    let item = component.get(&key).unwrap();
                    assert_eq!(item.in_memory_value().unwrap(), &format!("v{}", key));
                }
            })
        })
        .collect();

    for key in 0..100u32 {
        component.add(key, VersionedItem::updated(format!("v{}", key), 1000 + key as i64));
    }

    for handle in handles {
        handle.join().unwrap();
    }
}
