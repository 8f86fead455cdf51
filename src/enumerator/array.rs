//! Enumerator over a shared sorted array

use std::ops::{Bound, RangeBounds};
use std::sync::Arc;

use crate::item::VersionedItem;

use super::StoreEnumerator;

/// Cursor over an immutable, sorted `(key, item)` array.
///
/// The index starts one before the first element of the enumerated window
/// and stops at the window's end, which is the terminal state. Without a key
/// range the window is the whole array.
pub struct ArrayKeyVersionedItemEnumerator<K, V> {
    items: Arc<[(K, Arc<VersionedItem<V>>)]>,
    start: i64,
    end: i64,
    index: i64,
}

impl<K, V> ArrayKeyVersionedItemEnumerator<K, V> {
    pub fn new(items: Arc<[(K, Arc<VersionedItem<V>>)]>) -> Self {
        let end = items.len() as i64;
        Self {
            items,
            start: 0,
            end,
            index: -1,
        }
    }

    /// Number of items the enumeration covers
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    fn is_positioned(&self) -> bool {
        self.index >= self.start && self.index < self.end
    }
}

impl<K: Ord, V> ArrayKeyVersionedItemEnumerator<K, V> {
    /// Cursor over the items whose keys fall in `range`, located by binary
    /// search
    pub fn in_range<R: RangeBounds<K>>(items: Arc<[(K, Arc<VersionedItem<V>>)]>, range: &R) -> Self {
        let start = items.partition_point(|(key, _)| match range.start_bound() {
            Bound::Included(first) => key < first,
            Bound::Excluded(first) => key <= first,
            Bound::Unbounded => false,
        });
        let end = items
            .partition_point(|(key, _)| match range.end_bound() {
                Bound::Included(last) => key <= last,
                Bound::Excluded(last) => key < last,
                Bound::Unbounded => true,
            })
            .max(start);

        Self {
            items,
            start: start as i64,
            end: end as i64,
            index: start as i64 - 1,
        }
    }
}

impl<K, V> From<Vec<(K, Arc<VersionedItem<V>>)>> for ArrayKeyVersionedItemEnumerator<K, V> {
    fn from(items: Vec<(K, Arc<VersionedItem<V>>)>) -> Self {
        Self::new(items.into())
    }
}

impl<K, V> StoreEnumerator<K, V> for ArrayKeyVersionedItemEnumerator<K, V> {
    fn move_next(&mut self) -> bool {
        if self.index < self.end {
            self.index += 1;
        }
        self.index < self.end
    }

    fn current(&self) -> (&K, &Arc<VersionedItem<V>>) {
        assert!(
            self.is_positioned(),
            "current() called on an enumerator that is not positioned (index {})",
            self.index
        );
        let (key, item) = &self.items[self.index as usize];
        (key, item)
    }
}
