//! Enumerator over a recovered checkpoint file

use std::ops::RangeBounds;
use std::sync::Arc;

use crate::checkpoint::CheckpointFile;
use crate::item::{StoreKey, StoreValue, VersionedItem};
use crate::metadata::MetadataLease;

use super::{ArrayKeyVersionedItemEnumerator, StoreEnumerator};

/// Cursor over the items of one checkpoint file.
///
/// Holds the file and, when given, a lease on the generation it belongs to,
/// so the file cannot be deleted while the enumeration is in progress.
pub struct RecoveryStoreEnumerator<K, V> {
    inner: ArrayKeyVersionedItemEnumerator<K, V>,
    file: Arc<CheckpointFile<K, V>>,
    _lease: Option<MetadataLease>,
}

impl<K: StoreKey, V: StoreValue> RecoveryStoreEnumerator<K, V> {
    pub fn new(file: Arc<CheckpointFile<K, V>>, lease: Option<MetadataLease>) -> Self {
        Self {
            inner: ArrayKeyVersionedItemEnumerator::new(Arc::clone(file.items())),
            file,
            _lease: lease,
        }
    }

    /// Cursor over the items of `file` whose keys fall in `range`
    pub fn in_range<R: RangeBounds<K>>(
        file: Arc<CheckpointFile<K, V>>,
        lease: Option<MetadataLease>,
        range: &R,
    ) -> Self {
        Self {
            inner: ArrayKeyVersionedItemEnumerator::in_range(Arc::clone(file.items()), range),
            file,
            _lease: lease,
        }
    }

    /// The file being enumerated (for reading values of disk items)
    pub fn file(&self) -> &Arc<CheckpointFile<K, V>> {
        &self.file
    }
}

impl<K, V> StoreEnumerator<K, V> for RecoveryStoreEnumerator<K, V> {
    fn move_next(&mut self) -> bool {
        self.inner.move_next()
    }

    fn current(&self) -> (&K, &Arc<VersionedItem<V>>) {
        self.inner.current()
    }
}
