//! Read snapshot registry
//!
//! Tracks the sequence numbers of live read snapshots so version pruning
//! never reclaims a version one of them can still see.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Registry of active read snapshots (sequence number → holder count)
#[derive(Debug, Default)]
pub struct SnapshotRegistry {
    active: Mutex<BTreeMap<i64, usize>>,
}

impl SnapshotRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a snapshot at `sequence_number`; it stays active until dropped
    pub fn register(self: &Arc<Self>, sequence_number: i64) -> ReadSnapshot {
        *self.active.lock().entry(sequence_number).or_insert(0) += 1;
        ReadSnapshot {
            registry: Arc::clone(self),
            sequence_number,
        }
    }

    /// Oldest sequence number any active snapshot reads at
    pub fn oldest_active(&self) -> Option<i64> {
        self.active.lock().keys().next().copied()
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().values().sum()
    }

    fn release(&self, sequence_number: i64) {
        let mut active = self.active.lock();
        if let Some(count) = active.get_mut(&sequence_number) {
            *count -= 1;
            if *count == 0 {
                active.remove(&sequence_number);
            }
        }
    }
}

/// RAII handle of an active read snapshot
#[derive(Debug)]
pub struct ReadSnapshot {
    registry: Arc<SnapshotRegistry>,
    sequence_number: i64,
}

impl ReadSnapshot {
    pub fn sequence_number(&self) -> i64 {
        self.sequence_number
    }
}

impl Drop for ReadSnapshot {
    fn drop(&mut self) {
        self.registry.release(self.sequence_number);
    }
}
