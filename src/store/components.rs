//! The layered components a read walks through
//!
//! ```text
//!  differential  (writes since the last prepare)
//!       │ miss
//!  delta         (frozen by prepare, until complete)
//!       │ miss
//!  generation    (volatile: consolidated items in memory
//!                 persisted: checkpoint files, newest first)
//! ```

use std::collections::BTreeMap;
use std::ops::RangeBounds;
use std::sync::Arc;

use crate::checkpoint::CheckpointFile;
use crate::differential::DifferentialComponent;
use crate::enumerator::{
    ArrayKeyVersionedItemEnumerator, MergeEnumerator, RecoveryStoreEnumerator, StoreEnumerator,
};
use crate::error::{Result, StoreError};
use crate::item::{ItemValue, StoreKey, StoreValue, VersionedItem};
use crate::metadata::{MetadataLease, MetadataTable};

use super::StoreComponentReadResult;

pub(crate) type ItemArray<K, V> = Arc<[(K, Arc<VersionedItem<V>>)]>;

type BoxedEnumerator<K, V> = Box<dyn StoreEnumerator<K, V> + Send>;

/// One durable generation: its metadata table plus the opened state it names
pub(crate) struct Generation<K, V> {
    pub(crate) table: Arc<MetadataTable>,
    /// Newest first
    pub(crate) files: Vec<Arc<CheckpointFile<K, V>>>,
    /// Consolidated items of a volatile store
    pub(crate) memory: ItemArray<K, V>,
}

impl<K: StoreKey, V: StoreValue> Generation<K, V> {
    pub(crate) fn new(
        table: Arc<MetadataTable>,
        files: Vec<Arc<CheckpointFile<K, V>>>,
        memory: ItemArray<K, V>,
    ) -> Self {
        Self {
            table,
            files,
            memory,
        }
    }

    pub(crate) fn empty(table: Arc<MetadataTable>) -> Self {
        Self::new(table, Vec::new(), Vec::new().into())
    }

    /// Newest stored version of `key`
    pub(crate) fn lookup(&self, key: &K) -> Option<Arc<VersionedItem<V>>> {
        if let Ok(idx) = self.memory.binary_search_by(|(k, _)| k.cmp(key)) {
            return Some(Arc::clone(&self.memory[idx].1));
        }
        self.files
            .iter()
            .find_map(|file| file.get(key).cloned())
    }

    pub(crate) fn source_files(&self) -> BTreeMap<u32, Arc<CheckpointFile<K, V>>> {
        self.files
            .iter()
            .map(|file| (file.file_id(), Arc::clone(file)))
            .collect()
    }

    /// Highest begin sequence number stored in this generation
    pub(crate) fn max_sequence_number(&self) -> Option<i64> {
        let memory = self.memory.iter().map(|(_, item)| item.version_sequence_number());
        let files = self
            .files
            .iter()
            .flat_map(|file| file.items().iter().map(|(_, item)| item.version_sequence_number()));
        memory.chain(files).max()
    }

    /// Enumerators over the keys of this generation in `range`, newest first
    pub(crate) fn enumerators<R: RangeBounds<K>>(
        &self,
        lease: Option<&MetadataLease>,
        range: &R,
    ) -> Vec<BoxedEnumerator<K, V>> {
        let mut sources: Vec<BoxedEnumerator<K, V>> = Vec::with_capacity(self.files.len() + 1);
        if !self.memory.is_empty() {
            sources.push(Box::new(ArrayKeyVersionedItemEnumerator::in_range(
                Arc::clone(&self.memory),
                range,
            )));
        }
        for file in &self.files {
            sources.push(Box::new(RecoveryStoreEnumerator::in_range(
                Arc::clone(file),
                lease.cloned(),
                range,
            )));
        }
        sources
    }

    fn read_value(&self, item: &VersionedItem<V>) -> Result<Option<V>> {
        match item.value() {
            ItemValue::Memory(value) => Ok(Some(value.clone())),
            ItemValue::Absent => Ok(None),
            ItemValue::Disk(location) => {
                let file = self
                    .files
                    .iter()
                    .find(|file| file.file_id() == location.file_id)
                    .ok_or_else(|| {
                        StoreError::Corruption(format!(
                            "value in file {} which is not part of the generation",
                            location.file_id
                        ))
                    })?;
                file.read_value(item)
            }
        }
    }
}

/// The store's current components. Swapped as a unit.
pub(crate) struct Components<K, V> {
    pub(crate) differential: Arc<DifferentialComponent<K, V>>,
    pub(crate) delta: Option<Arc<DifferentialComponent<K, V>>>,
    pub(crate) generation: Arc<Generation<K, V>>,
}

impl<K, V> Clone for Components<K, V> {
    fn clone(&self) -> Self {
        Self {
            differential: Arc::clone(&self.differential),
            delta: self.delta.clone(),
            generation: Arc::clone(&self.generation),
        }
    }
}

impl<K: StoreKey, V: StoreValue> Components<K, V> {
    /// Current version of `key` across all layers (no value materialization)
    pub(crate) fn latest_item(&self, key: &K) -> Option<Arc<VersionedItem<V>>> {
        self.differential
            .get(key)
            .or_else(|| self.delta.as_ref().and_then(|delta| delta.get(key)))
            .or_else(|| self.generation.lookup(key))
    }

    /// Every in-memory version of `key` (differential, then delta), newest first
    pub(crate) fn in_memory_versions(&self, key: &K) -> Vec<Arc<VersionedItem<V>>> {
        let mut versions = self.differential.versions(key);
        if let Some(delta) = &self.delta {
            versions.extend(delta.versions(key));
        }
        versions
    }
}

/// Components pinned for reading: the generation is leased so its files
/// survive until the view is dropped
pub(crate) struct ComponentView<K, V> {
    components: Components<K, V>,
    lease: MetadataLease,
}

impl<K: StoreKey, V: StoreValue> ComponentView<K, V> {
    pub(crate) fn new(components: Components<K, V>, lease: MetadataLease) -> Self {
        Self { components, lease }
    }

    pub(crate) fn generation(&self) -> &Arc<Generation<K, V>> {
        &self.components.generation
    }

    pub(crate) fn lease(&self) -> &MetadataLease {
        &self.lease
    }

    /// Materialize the value of an item found through this view
    pub(crate) fn read_value(&self, item: &VersionedItem<V>) -> Result<Option<V>> {
        self.components.generation.read_value(item)
    }

    /// Latest version of `key` with its value
    pub(crate) fn read(&self, key: &K) -> Result<StoreComponentReadResult<V>> {
        let item = self.components.latest_item(key);
        self.materialize(item)
    }

    /// Version of `key` visible "as of" `sequence_number`, with its value
    pub(crate) fn read_at(&self, key: &K, sequence_number: i64) -> Result<StoreComponentReadResult<V>> {
        let item = self
            .components
            .differential
            .read_at(key, sequence_number)
            .or_else(|| {
                self.components
                    .delta
                    .as_ref()
                    .and_then(|delta| delta.read_at(key, sequence_number))
            })
            .or_else(|| {
                self.components
                    .generation
                    .lookup(key)
                    .filter(|item| item.version_sequence_number() <= sequence_number)
            });
        self.materialize(item)
    }

    fn materialize(&self, item: Option<Arc<VersionedItem<V>>>) -> Result<StoreComponentReadResult<V>> {
        match item {
            Some(item) => {
                let value = self.components.generation.read_value(&item)?;
                Ok(StoreComponentReadResult::new(Some(item), value))
            }
            None => Ok(StoreComponentReadResult::miss()),
        }
    }

    /// Merged latest versions across every layer, in key order
    pub(crate) fn enumerate(&self) -> MergeEnumerator<K, V> {
        self.enumerate_range(&.., None)
    }

    /// Merged versions visible at `sequence_number` (latest when `None`)
    pub(crate) fn enumerate_at(&self, sequence_number: Option<i64>) -> MergeEnumerator<K, V> {
        self.enumerate_range(&.., sequence_number)
    }

    /// Merged versions of the keys in `range`. Every source seeks to the
    /// range start and stops after its end.
    pub(crate) fn enumerate_range<R: RangeBounds<K>>(
        &self,
        range: &R,
        sequence_number: Option<i64>,
    ) -> MergeEnumerator<K, V> {
        let layer = |component: &DifferentialComponent<K, V>| -> BoxedEnumerator<K, V> {
            Box::new(ArrayKeyVersionedItemEnumerator::from(
                component.range_snapshot(range, sequence_number),
            ))
        };

        let mut sources = vec![layer(&self.components.differential)];
        if let Some(delta) = &self.components.delta {
            sources.push(layer(delta));
        }
        sources.extend(self.components.generation.enumerators(Some(&self.lease), range));
        MergeEnumerator::new(sources)
    }

    /// Visible keys from an enumerator over this view
    pub(crate) fn collect_keys(&self, enumerator: &mut MergeEnumerator<K, V>) -> Vec<K> {
        let mut keys = Vec::new();
        while enumerator.move_next() {
            let (key, item) = enumerator.current();
            if !item.is_deleted() {
                keys.push(key.clone());
            }
        }
        keys
    }

    /// Visible (key, value) pairs from an enumerator over this view
    pub(crate) fn collect_values(&self, enumerator: &mut MergeEnumerator<K, V>) -> Result<Vec<(K, V)>> {
        let mut entries = Vec::new();
        while enumerator.move_next() {
            let (key, item) = enumerator.current();
            if item.is_deleted() {
                continue;
            }
            if let Some(value) = self.components.generation.read_value(item)? {
                entries.push((key.clone(), value));
            }
        }
        Ok(entries)
    }
}
