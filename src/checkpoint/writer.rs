//! CheckpointWriter: sorted enumerator → key/value file pair

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::enumerator::StoreEnumerator;
use crate::error::{Result, StoreError};
use crate::item::{self, ItemValue, StoreKey, StoreValue};
use crate::metadata::{remove_if_exists, FileMetadata};

use super::{
    checkpoint_file_name, key_file_path, value_file_path, CheckpointFile, KeyFileBuilder,
    KeyRecord, ValueFileBuilder,
};

/// Writes one checkpoint file pair from a sorted stream of items.
///
/// Values held in memory are serialized; values already on disk are copied
/// byte for byte from their source checkpoint file.
pub struct CheckpointWriter {
    dir: PathBuf,
    file_id: u32,
    sync: bool,
    drop_tombstones: bool,
}

impl CheckpointWriter {
    pub fn new(dir: &Path, file_id: u32) -> Self {
        Self {
            dir: dir.to_path_buf(),
            file_id,
            sync: true,
            drop_tombstones: false,
        }
    }

    /// fsync both files before returning
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Omit tombstones. Only valid when the output replaces every older file.
    pub fn drop_tombstones(mut self, drop: bool) -> Self {
        self.drop_tombstones = drop;
        self
    }

    /// Drain `items` into a new file pair.
    ///
    /// `sources` resolves values that live in existing checkpoint files. On
    /// any error, cancellation included, the partial files are removed.
    pub fn write<K, V, E>(
        self,
        items: &mut E,
        sources: &BTreeMap<u32, Arc<CheckpointFile<K, V>>>,
        token: &CancellationToken,
    ) -> Result<FileMetadata>
    where
        K: StoreKey,
        V: StoreValue,
        E: StoreEnumerator<K, V> + ?Sized,
    {
        let file_name = checkpoint_file_name(self.file_id);
        let key_path = key_file_path(&self.dir, &file_name);
        let value_path = value_file_path(&self.dir, &file_name);

        match self.write_files(items, sources, token, &key_path, &value_path, &file_name) {
            Ok(metadata) => Ok(metadata),
            Err(e) => {
                tracing::debug!(
                    file_id = self.file_id,
                    "Removing partial checkpoint file: {}",
                    e
                );
                for path in [&key_path, &value_path] {
                    if let Err(cleanup) = remove_if_exists(path) {
                        tracing::warn!("Failed to remove {}: {}", path.display(), cleanup);
                    }
                }
                Err(e)
            }
        }
    }

    fn write_files<K, V, E>(
        &self,
        items: &mut E,
        sources: &BTreeMap<u32, Arc<CheckpointFile<K, V>>>,
        token: &CancellationToken,
        key_path: &Path,
        value_path: &Path,
        file_name: &str,
    ) -> Result<FileMetadata>
    where
        K: StoreKey,
        V: StoreValue,
        E: StoreEnumerator<K, V> + ?Sized,
    {
        let mut keys = KeyFileBuilder::new(key_path, self.sync)?;
        let mut values = ValueFileBuilder::new(value_path, self.sync)?;
        let mut valid = 0u64;
        let mut deleted = 0u64;
        let mut last_key: Option<K> = None;

        while items.move_next() {
            token.check()?;
            let (key, item) = items.current();

            if let Some(previous) = &last_key {
                assert!(previous < key, "checkpoint input out of order at {:?}", key);
            }
            last_key = Some(key.clone());

            if item.is_deleted() && self.drop_tombstones {
                continue;
            }

            let (value_offset, value_size) = match item.value() {
                ItemValue::Memory(value) => values.append(&item::encode(value)?)?,
                ItemValue::Disk(location) => {
                    let source = sources.get(&location.file_id).ok_or_else(|| {
                        StoreError::Corruption(format!(
                            "value of {:?} lives in unknown file {}",
                            key, location.file_id
                        ))
                    })?;
                    values.append(&source.read_raw(location)?)?
                }
                ItemValue::Absent => (0, 0),
            };

            let record = KeyRecord {
                kind: item.kind(),
                version_sequence_number: item.version_sequence_number(),
                end_sequence_number: item.raw_end_sequence_number(),
                ttl: item.ttl(),
                value_offset,
                value_size,
            };
            keys.add(&item::encode(key)?, &record)?;

            if item.is_deleted() {
                deleted += 1;
            } else {
                valid += 1;
            }
        }

        let (total, key_file_size) = keys.finish()?;
        let (_, value_file_size) = values.finish()?;

        tracing::debug!(
            file_id = self.file_id,
            total,
            valid,
            deleted,
            "Wrote checkpoint file"
        );

        Ok(FileMetadata::new(
            &self.dir,
            self.file_id,
            file_name,
            total,
            valid,
            deleted,
            key_file_size,
            value_file_size,
        ))
    }
}
