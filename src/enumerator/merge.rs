//! K-way merge of sorted enumerators
//!
//! Sources are given newest first. For each key the version with the highest
//! sequence number wins; equal sequence numbers go to the newer source.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::item::{StoreKey, VersionedItem};

use super::StoreEnumerator;

/// Heap entry: the next key of one source. Min-heap on (key, source).
struct HeapEntry<K> {
    key: K,
    source: usize,
}

impl<K: Ord> PartialEq for HeapEntry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl<K: Ord> Eq for HeapEntry<K> {}

impl<K: Ord> PartialOrd for HeapEntry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord> Ord for HeapEntry<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merged, deduplicated view over several sorted enumerators
pub struct MergeEnumerator<K, V> {
    sources: Vec<Box<dyn StoreEnumerator<K, V> + Send>>,
    heap: BinaryHeap<HeapEntry<K>>,
    current: Option<(K, Arc<VersionedItem<V>>)>,
    started: bool,
    finished: bool,
}

impl<K: StoreKey, V> MergeEnumerator<K, V> {
    /// `sources` ordered newest first
    pub fn new(sources: Vec<Box<dyn StoreEnumerator<K, V> + Send>>) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            current: None,
            started: false,
            finished: false,
        }
    }

    fn advance_source(&mut self, source: usize) {
        if self.sources[source].move_next() {
            let key = self.sources[source].current().0.clone();
            self.heap.push(HeapEntry { key, source });
        }
    }
}

impl<K: StoreKey, V> StoreEnumerator<K, V> for MergeEnumerator<K, V> {
    fn move_next(&mut self) -> bool {
        if self.finished {
            return false;
        }
        if !self.started {
            self.started = true;
            for source in 0..self.sources.len() {
                self.advance_source(source);
            }
        }

        let first = match self.heap.pop() {
            Some(entry) => entry,
            None => {
                self.current = None;
                self.finished = true;
                return false;
            }
        };

        // Every source positioned on the same key; the first popped is the newest
        let mut winner = Arc::clone(self.sources[first.source].current().1);
        let mut consumed = vec![first.source];
        while let Some(next) = self.heap.peek() {
            if next.key != first.key {
                break;
            }
            let source = next.source;
            self.heap.pop();
            let candidate = self.sources[source].current().1;
            if candidate.version_sequence_number() > winner.version_sequence_number() {
                winner = Arc::clone(candidate);
            }
            consumed.push(source);
        }

        for source in consumed {
            self.advance_source(source);
        }
        self.current = Some((first.key, winner));
        true
    }

    fn current(&self) -> (&K, &Arc<VersionedItem<V>>) {
        match &self.current {
            Some((key, item)) => (key, item),
            None => panic!("current() called on an enumerator that is not positioned"),
        }
    }
}
