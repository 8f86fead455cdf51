//! Tests for copying one store into another
//!
//! These tests verify:
//! - A copy rebuilds the source's last checkpoint byte for byte
//! - Writes after the source's last checkpoint are not part of a copy
//! - A truncated copy leaves the target as it was
//! - Volatile stores copy their visible items
//! - Closing the target during a copy fails the copy with `Closed`

use std::fs;
use std::io::Cursor;

use tempfile::TempDir;
use tstore::copy::{ChannelTransport, CopyTransport, StreamTransport, MAX_FRAME_PAYLOAD};
use tstore::{StoreError, ZERO_LSN};

use crate::{checkpoint, persisted_store, value, volatile_store, TestStore};

// =============================================================================
// Helper Functions
// =============================================================================

fn copy(source: &TestStore, target: &TestStore) -> tstore::Result<()> {
    let (mut tx, mut rx) = ChannelTransport::pair();
    source.copy_to(&mut tx)?;
    tx.close();
    target.receive_from(&mut rx)
}

fn populated_source(dir: &TempDir) -> TestStore {
    let store = persisted_store(dir.path());
    for i in 0..100u64 {
        store.add(i, format!("value-{}", i), i as i64 + 1).unwrap();
    }
    checkpoint(&store, 100);
    store.remove(5, 101, None).unwrap();
    store.update(6, value("six"), 102, None).unwrap();
    checkpoint(&store, 102);
    store
}

// =============================================================================
// Persisted Copy Tests
// =============================================================================

#[test]
fn test_copy_into_empty_store() {
    let source_dir = TempDir::new().unwrap();
    let target_dir = TempDir::new().unwrap();
    let source = populated_source(&source_dir);
    let target = persisted_store(target_dir.path());

    copy(&source, &target).unwrap();

    assert_eq!(target.checkpoint_lsn(), 102);
    assert_eq!(target.last_sequence_number(), 102);
    assert_eq!(target.entries().unwrap(), source.entries().unwrap());
    assert_eq!(target.get(&5).unwrap(), None);
    assert_eq!(target.get(&6).unwrap(), Some(value("six")));
    assert!(!target.staging_dir().exists());
}

#[test]
fn test_copied_files_are_identical() {
    let source_dir = TempDir::new().unwrap();
    let target_dir = TempDir::new().unwrap();
    let source = populated_source(&source_dir);
    let target = persisted_store(target_dir.path());

    copy(&source, &target).unwrap();

    let source_files = source.metadata_table().files();
    let target_files = target.metadata_table().files();
    assert_eq!(source_files.len(), target_files.len());
    for (s, t) in source_files.iter().zip(target_files.iter()) {
        assert_eq!(
            fs::read(s.key_file_path()).unwrap(),
            fs::read(t.key_file_path()).unwrap()
        );
        assert_eq!(
            fs::read(s.value_file_path()).unwrap(),
            fs::read(t.value_file_path()).unwrap()
        );
        assert_eq!(s.total_number_of_entries(), t.total_number_of_entries());
    }
}

#[test]
fn test_copy_sends_last_checkpoint_only() {
    let source_dir = TempDir::new().unwrap();
    let target_dir = TempDir::new().unwrap();
    let source = persisted_store(source_dir.path());
    source.add(1, value("a"), 1).unwrap();
    checkpoint(&source, 1);
    source.add(2, value("b"), 2).unwrap();

    let target = persisted_store(target_dir.path());
    copy(&source, &target).unwrap();

    assert_eq!(target.get(&1).unwrap(), Some(value("a")));
    assert_eq!(target.get(&2).unwrap(), None);

    // The replication layer replays the rest
    target.add(2, value("b"), 2).unwrap();
    assert_eq!(target.len().unwrap(), 2);
}

#[test]
fn test_copy_replaces_existing_state() {
    let source_dir = TempDir::new().unwrap();
    let target_dir = TempDir::new().unwrap();
    let source = populated_source(&source_dir);

    let target = persisted_store(target_dir.path());
    target.add(1000, value("stale"), 1).unwrap();
    checkpoint(&target, 1);
    target.add(1001, value("pending"), 2).unwrap();
    let stale_files = target.metadata_table().files();

    copy(&source, &target).unwrap();

    assert_eq!(target.get(&1000).unwrap(), None);
    assert_eq!(target.get(&1001).unwrap(), None);
    for file in stale_files {
        assert!(!file.key_file_path().exists());
    }
}

#[test]
fn test_target_usable_after_copy() {
    let source_dir = TempDir::new().unwrap();
    let target_dir = TempDir::new().unwrap();
    let source = populated_source(&source_dir);

    {
        let target = persisted_store(target_dir.path());
        copy(&source, &target).unwrap();
        target.update(1, value("one"), 103, None).unwrap();
        checkpoint(&target, 103);
    }

    let target = persisted_store(target_dir.path());
    assert_eq!(target.checkpoint_lsn(), 103);
    assert_eq!(target.get(&1).unwrap(), Some(value("one")));
    assert_eq!(target.len().unwrap(), 99);
}

#[test]
fn test_truncated_copy_keeps_previous_state() {
    let source_dir = TempDir::new().unwrap();
    let target_dir = TempDir::new().unwrap();
    let source = populated_source(&source_dir);

    let target = persisted_store(target_dir.path());
    target.add(1000, value("kept"), 1).unwrap();
    checkpoint(&target, 1);

    let frames: Vec<_> = source
        .copy_stream()
        .unwrap()
        .collect::<tstore::Result<Vec<_>>>()
        .unwrap();
    let (mut tx, mut rx) = ChannelTransport::pair();
    for frame in &frames[..frames.len() - 1] {
        tx.send(frame).unwrap();
    }
    tx.close();

    assert!(matches!(
        target.receive_from(&mut rx),
        Err(StoreError::CopyAborted)
    ));
    assert_eq!(target.checkpoint_lsn(), 1);
    assert_eq!(target.entries().unwrap(), vec![(1000, value("kept"))]);
    assert!(!target.staging_dir().exists());
}

#[test]
fn test_corrupted_frame_aborts_copy() {
    let source_dir = TempDir::new().unwrap();
    let target_dir = TempDir::new().unwrap();
    let source = populated_source(&source_dir);
    let target = persisted_store(target_dir.path());

    let mut frames: Vec<_> = source
        .copy_stream()
        .unwrap()
        .collect::<tstore::Result<Vec<_>>>()
        .unwrap();
    // Drop the first key chunk
    frames.remove(3);

    let (mut tx, mut rx) = ChannelTransport::pair();
    for frame in &frames {
        tx.send(frame).unwrap();
    }
    tx.close();

    assert!(matches!(target.receive_from(&mut rx), Err(StoreError::Copy(_))));
    assert!(target.is_empty().unwrap());
    assert!(!target.staging_dir().exists());
}

#[test]
fn test_copy_frame_by_frame() {
    let source_dir = TempDir::new().unwrap();
    let target_dir = TempDir::new().unwrap();
    let source = populated_source(&source_dir);
    let target = persisted_store(target_dir.path());

    target.begin_setting_current_state().unwrap();
    for frame in source.copy_stream().unwrap() {
        target.set_current_state(&frame.unwrap()).unwrap();
    }
    target.end_setting_current_state().unwrap();

    assert_eq!(target.entries().unwrap(), source.entries().unwrap());
}

#[test]
fn test_end_without_complete_aborts() {
    let target_dir = TempDir::new().unwrap();
    let target = persisted_store(target_dir.path());

    target.begin_setting_current_state().unwrap();
    assert!(matches!(
        target.end_setting_current_state(),
        Err(StoreError::CopyAborted)
    ));
    assert_eq!(target.checkpoint_lsn(), tstore::INVALID_LSN);
}

#[test]
fn test_copy_over_byte_stream() {
    let source_dir = TempDir::new().unwrap();
    let target_dir = TempDir::new().unwrap();
    let source = populated_source(&source_dir);
    let target = persisted_store(target_dir.path());

    let mut sender = StreamTransport::new(Cursor::new(Vec::new()));
    source.copy_to(&mut sender).unwrap();

    let mut cursor = sender.into_inner();
    cursor.set_position(0);
    target
        .receive_from(&mut StreamTransport::new(cursor))
        .unwrap();

    assert_eq!(target.checkpoint_lsn(), 102);
    assert_eq!(target.len().unwrap(), 99);
}

#[test]
fn test_copy_thread_to_thread() {
    let source_dir = TempDir::new().unwrap();
    let target_dir = TempDir::new().unwrap();
    let source = populated_source(&source_dir);
    let target = persisted_store(target_dir.path());

    let (mut tx, mut rx) = ChannelTransport::bounded_pair(4);
    std::thread::scope(|scope| {
        scope.spawn(|| {
            source.copy_to(&mut tx).unwrap();
            tx.close();
        });
        target.receive_from(&mut rx).unwrap();
    });

    assert_eq!(target.entries().unwrap(), source.entries().unwrap());
}

#[test]
fn test_set_and_end_without_begin() {
    let source_dir = TempDir::new().unwrap();
    let target_dir = TempDir::new().unwrap();
    let source = populated_source(&source_dir);
    let target = persisted_store(target_dir.path());

    let frame = source.copy_stream().unwrap().next().unwrap().unwrap();
    assert!(matches!(
        target.set_current_state(&frame),
        Err(StoreError::CopyAborted)
    ));
    assert!(matches!(
        target.end_setting_current_state(),
        Err(StoreError::CopyAborted)
    ));
}

// =============================================================================
// Close During Copy Tests
// =============================================================================

#[test]
fn test_close_during_frame_by_frame_copy() {
    let source_dir = TempDir::new().unwrap();
    let target_dir = TempDir::new().unwrap();
    let source = populated_source(&source_dir);
    let target = persisted_store(target_dir.path());

    let frames: Vec<_> = source
        .copy_stream()
        .unwrap()
        .collect::<tstore::Result<Vec<_>>>()
        .unwrap();

    target.begin_setting_current_state().unwrap();
    for frame in &frames[..3] {
        target.set_current_state(frame).unwrap();
    }
    target.close().unwrap();

    assert!(matches!(
        target.set_current_state(&frames[3]),
        Err(StoreError::Closed)
    ));
    assert!(matches!(
        target.end_setting_current_state(),
        Err(StoreError::Closed)
    ));
    assert!(matches!(
        target.begin_setting_current_state(),
        Err(StoreError::Closed)
    ));
    assert!(!target.staging_dir().exists());
}

#[test]
fn test_close_while_receiving_on_another_thread() {
    let source_dir = TempDir::new().unwrap();
    let target_dir = TempDir::new().unwrap();
    let source = populated_source(&source_dir);
    let target = persisted_store(target_dir.path());

    let frames: Vec<_> = source
        .copy_stream()
        .unwrap()
        .collect::<tstore::Result<Vec<_>>>()
        .unwrap();

    let (mut tx, mut rx) = ChannelTransport::pair();
    let result = std::thread::scope(|scope| {
        let receiver = scope.spawn(|| target.receive_from(&mut rx));

        for frame in &frames[..3] {
            tx.send(frame).unwrap();
        }
        // The complete frame is only sent after the close
        target.close().unwrap();
        for frame in &frames[3..] {
            tx.send(frame).unwrap();
        }
        tx.close();

        receiver.join().unwrap()
    });

    assert!(matches!(result, Err(StoreError::Closed)));
    assert!(!target.staging_dir().exists());
    assert!(matches!(target.get(&1), Err(StoreError::Closed)));
}

// =============================================================================
// Volatile Copy Tests
// =============================================================================

#[test]
fn test_volatile_copy() {
    let source = volatile_store();
    source.add(1, value("a"), 1).unwrap();
    source.add_with_ttl(2, value("b"), 1_000, 2).unwrap();
    source.add(3, value("c"), 3).unwrap();
    checkpoint(&source, 3);
    source.remove(3, 4, None).unwrap();
    source.update(1, value("a2"), 5, None).unwrap();

    let target = volatile_store();
    target.add(99, value("stale"), 1).unwrap();
    copy(&source, &target).unwrap();

    assert_eq!(target.checkpoint_lsn(), ZERO_LSN);
    assert_eq!(target.entries().unwrap(), vec![(1, value("a2")), (2, value("b"))]);
    assert_eq!(target.read(&2).unwrap().item().unwrap().ttl(), Some(1_000));
    assert_eq!(target.read(&1).unwrap().version_sequence_number(), Some(5));
    assert_eq!(target.last_sequence_number(), 5);

    target.update(2, value("b2"), 6, None).unwrap();
    checkpoint(&target, 6);
    assert_eq!(target.get(&2).unwrap(), Some(value("b2")));
}

#[test]
fn test_volatile_copy_of_empty_store() {
    let source = volatile_store();
    let target = volatile_store();
    target.add(1, value("stale"), 1).unwrap();

    copy(&source, &target).unwrap();
    assert!(target.is_empty().unwrap());
}

#[test]
fn test_volatile_value_over_frame_limit_fails_copy() {
    let source = volatile_store();
    source.add(1, value("small"), 1).unwrap();
    source
        .add(2, "x".repeat(MAX_FRAME_PAYLOAD as usize + 1), 2)
        .unwrap();

    let target = volatile_store();
    target.add(99, value("kept"), 1).unwrap();

    let (mut tx, mut rx) = ChannelTransport::pair();
    assert!(matches!(source.copy_to(&mut tx), Err(StoreError::Copy(_))));
    tx.close();

    assert!(target.receive_from(&mut rx).is_err());
    assert_eq!(target.entries().unwrap(), vec![(99, value("kept"))]);
}
