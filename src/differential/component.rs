//! DifferentialComponent implementation
//!
//! BTreeMap of version chains with RwLock for concurrency.

use std::collections::{BTreeMap, VecDeque};
use std::ops::RangeBounds;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::enumerator::is_empty_range;
use crate::item::{StoreKey, StoreValue, VersionedItem};

/// Versions of one key, newest first
#[derive(Debug)]
pub struct VersionChain<V> {
    versions: VecDeque<Arc<VersionedItem<V>>>,
}

impl<V> VersionChain<V> {
    fn new(item: Arc<VersionedItem<V>>) -> Self {
        let mut versions = VecDeque::with_capacity(2);
        versions.push_front(item);
        Self { versions }
    }

    /// Push a newer version, closing the current head.
    ///
    /// Returns false (and changes nothing) when `item` is not newer than the
    /// head: a replayed write.
    fn push(&mut self, item: Arc<VersionedItem<V>>) -> bool {
        if let Some(head) = self.versions.front() {
            if item.version_sequence_number() <= head.version_sequence_number() {
                return false;
            }
            // Absorbed chains arrive with their ends already closed
            if head.end_sequence_number().is_none() {
                head.close_end(item.version_sequence_number());
            }
        }
        self.versions.push_front(item);
        true
    }

    /// Current version
    pub fn latest(&self) -> Option<&Arc<VersionedItem<V>>> {
        self.versions.front()
    }

    /// The version a read "as of" `sequence_number` sees, if it is in this chain
    pub fn visible_at(&self, sequence_number: i64) -> Option<&Arc<VersionedItem<V>>> {
        self.versions
            .iter()
            .find(|item| item.version_sequence_number() <= sequence_number)
    }

    /// Drop superseded versions no snapshot at or after `oldest_active` can see.
    /// The head is always kept. Returns the number of versions dropped.
    fn prune(&mut self, oldest_active: Option<i64>) -> usize {
        let before = self.versions.len();
        while self.versions.len() > 1 {
            let reclaimable = match self.versions.back().and_then(|v| v.end_sequence_number()) {
                Some(end) => oldest_active.map_or(true, |oldest| end <= oldest),
                None => false,
            };
            if !reclaimable {
                break;
            }
            self.versions.pop_back();
        }
        before - self.versions.len()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Versions newest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<VersionedItem<V>>> {
        self.versions.iter()
    }
}

/// In-memory component holding the not-yet-checkpointed writes
pub struct DifferentialComponent<K, V> {
    data: RwLock<BTreeMap<K, VersionChain<V>>>,
}

impl<K: StoreKey, V: StoreValue> DifferentialComponent<K, V> {
    /// Create a new empty component
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
        }
    }

    /// Add a new version for `key` (insert, update or tombstone).
    ///
    /// Returns false when the sequence number is not newer than the key's
    /// current version; replays are ignored rather than reordered.
    pub fn add(&self, key: K, item: VersionedItem<V>) -> bool {
        let item = Arc::new(item);
        let mut data = self.data.write();
        match data.get_mut(&key) {
            Some(chain) => chain.push(item),
            None => {
                data.insert(key, VersionChain::new(item));
                true
            }
        }
    }

    /// Current version of `key`
    pub fn get(&self, key: &K) -> Option<Arc<VersionedItem<V>>> {
        self.data.read().get(key).and_then(|c| c.latest().cloned())
    }

    /// Version of `key` visible "as of" `sequence_number`.
    ///
    /// `None` means this component holds nothing visible at that point; the
    /// caller falls through to older components.
    pub fn read_at(&self, key: &K, sequence_number: i64) -> Option<Arc<VersionedItem<V>>> {
        self.data
            .read()
            .get(key)
            .and_then(|c| c.visible_at(sequence_number).cloned())
    }

    /// Every retained version of `key`, newest first
    pub fn versions(&self, key: &K) -> Vec<Arc<VersionedItem<V>>> {
        self.data
            .read()
            .get(key)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.data.read().contains_key(key)
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Number of retained versions across all keys
    pub fn version_count(&self) -> usize {
        self.data.read().values().map(|c| c.len()).sum()
    }

    /// Highest begin sequence number held, if any
    pub fn max_sequence_number(&self) -> Option<i64> {
        self.data
            .read()
            .values()
            .filter_map(|c| c.latest().map(|i| i.version_sequence_number()))
            .max()
    }

    /// Sorted (key, current version) pairs
    pub fn snapshot(&self) -> Vec<(K, Arc<VersionedItem<V>>)> {
        self.range_snapshot(&.., None)
    }

    /// Sorted (key, version visible at `sequence_number`) pairs
    pub fn snapshot_at(&self, sequence_number: i64) -> Vec<(K, Arc<VersionedItem<V>>)> {
        self.range_snapshot(&.., Some(sequence_number))
    }

    /// Sorted pairs for the keys in `range`: the latest version, or the one
    /// visible at `sequence_number`
    pub fn range_snapshot<R: RangeBounds<K>>(
        &self,
        range: &R,
        sequence_number: Option<i64>,
    ) -> Vec<(K, Arc<VersionedItem<V>>)> {
        if is_empty_range(range) {
            return Vec::new();
        }
        self.data
            .read()
            .range::<K, _>((range.start_bound(), range.end_bound()))
            .filter_map(|(k, c)| {
                let item = match sequence_number {
                    Some(s) => c.visible_at(s),
                    None => c.latest(),
                };
                item.map(|i| (k.clone(), Arc::clone(i)))
            })
            .collect()
    }

    /// Fold a newer component into this one, oldest versions first
    pub fn absorb(&self, newer: &DifferentialComponent<K, V>) {
        let newer = newer.data.read();
        let mut data = self.data.write();
        for (key, chain) in newer.iter() {
            for item in chain.iter().rev() {
                let item = Arc::clone(item);
                match data.get_mut(key) {
                    Some(existing) => {
                        existing.push(item);
                    }
                    None => {
                        data.insert(key.clone(), VersionChain::new(item));
                    }
                }
            }
        }
    }

    /// Reclaim superseded versions invisible to every snapshot at or after
    /// `oldest_active` (all superseded versions when `None`).
    pub fn prune(&self, oldest_active: Option<i64>) -> usize {
        let mut data = self.data.write();
        data.values_mut().map(|c| c.prune(oldest_active)).sum()
    }

    /// Remove everything
    pub fn clear(&self) {
        self.data.write().clear();
    }
}

impl<K: StoreKey, V: StoreValue> Default for DifferentialComponent<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
