//! Read-path result

use std::sync::Arc;

use crate::item::VersionedItem;

/// Outcome of one lookup: the version found (if any) and its materialized
/// value (absent for tombstones and misses)
#[derive(Debug, Clone)]
pub struct StoreComponentReadResult<V> {
    item: Option<Arc<VersionedItem<V>>>,
    value: Option<V>,
}

impl<V> StoreComponentReadResult<V> {
    pub(crate) fn new(item: Option<Arc<VersionedItem<V>>>, value: Option<V>) -> Self {
        Self { item, value }
    }

    /// Nothing stored for the key
    pub fn miss() -> Self {
        Self {
            item: None,
            value: None,
        }
    }

    pub fn has_item(&self) -> bool {
        self.item.is_some()
    }

    /// The key exists (found and not a tombstone)
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn is_tombstone(&self) -> bool {
        self.item.as_ref().is_some_and(|item| item.is_deleted())
    }

    pub fn item(&self) -> Option<&Arc<VersionedItem<V>>> {
        self.item.as_ref()
    }

    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<V> {
        self.value
    }

    /// Begin sequence number of the version found
    pub fn version_sequence_number(&self) -> Option<i64> {
        self.item.as_ref().map(|item| item.version_sequence_number())
    }
}
