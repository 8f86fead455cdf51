//! CheckpointFile: an opened key/value file pair

use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::item::{self, ItemValue, StoreKey, StoreValue, ValueLocation, VersionedItem};
use crate::metadata::FileMetadata;

use super::{KeyFileReader, ValueFileReader};

/// Sorted items of one checkpoint file, with a reader for their values.
///
/// Keys and versioning metadata are held in memory; values stay on disk and
/// are read through the value file on demand.
pub struct CheckpointFile<K, V> {
    file_id: u32,
    items: Arc<[(K, Arc<VersionedItem<V>>)]>,
    values: ValueFileReader,
}

impl<K: StoreKey, V: StoreValue> CheckpointFile<K, V> {
    /// Open and validate the pair described by `metadata`
    pub fn open(metadata: &FileMetadata) -> Result<Self> {
        let key_path = metadata.key_file_path();
        let keys = KeyFileReader::open(&key_path, Some(metadata.key_file_size()))?;
        if keys.entry_count() != metadata.total_number_of_entries() {
            return Err(StoreError::Corruption(format!(
                "{}: {} entries but metadata records {}",
                key_path.display(),
                keys.entry_count(),
                metadata.total_number_of_entries()
            )));
        }

        let values = ValueFileReader::open(
            &metadata.value_file_path(),
            Some(metadata.value_file_size()),
        )?;
        let items = keys.into_items(metadata.file_id())?;

        tracing::debug!(
            file_id = metadata.file_id(),
            entries = items.len(),
            "Opened checkpoint file"
        );

        Ok(Self {
            file_id: metadata.file_id(),
            items: items.into(),
            values,
        })
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sorted (key, item) pairs, shared
    pub fn items(&self) -> &Arc<[(K, Arc<VersionedItem<V>>)]> {
        &self.items
    }

    /// Binary search for `key`
    pub fn get(&self, key: &K) -> Option<&Arc<VersionedItem<V>>> {
        self.items
            .binary_search_by(|(k, _)| k.cmp(key))
            .ok()
            .map(|idx| &self.items[idx].1)
    }

    /// Raw serialized bytes of a value stored in this file
    pub fn read_raw(&self, location: &ValueLocation) -> Result<Vec<u8>> {
        if location.file_id != self.file_id {
            return Err(StoreError::Corruption(format!(
                "value location for file {} read from file {}",
                location.file_id, self.file_id
            )));
        }
        self.values.read(location)
    }

    /// Materialize the value of an item (None for tombstones)
    pub fn read_value(&self, item: &VersionedItem<V>) -> Result<Option<V>> {
        match item.value() {
            ItemValue::Memory(value) => Ok(Some(value.clone())),
            ItemValue::Disk(location) => {
                let bytes = self.read_raw(location)?;
                Ok(Some(item::decode(&bytes)?))
            }
            ItemValue::Absent => Ok(None),
        }
    }
}

impl<K, V> std::fmt::Debug for CheckpointFile<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointFile")
            .field("file_id", &self.file_id)
            .field("entries", &self.items.len())
            .finish()
    }
}
