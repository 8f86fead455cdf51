//! Three-phase checkpoint
//!
//! ```text
//!  prepare(lsn)     differential ──freeze──► delta, fresh differential
//!  perform(token)   delta (+ live files) ──merge──► checkpoint_N.sfk/.sfv
//!                   next MetadataTable ──► temp_metadata.sfm
//!  complete()       temp ──safe replace──► current_metadata.sfm
//!                   next generation becomes current, old one is closed
//! ```
//!
//! Nothing perform produces is visible to readers until complete swaps the
//! generation. A failed or cancelled perform leaves the delta in place so the
//! checkpoint can be performed again.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::checkpoint::{CheckpointFile, CheckpointWriter};
use crate::differential::DifferentialComponent;
use crate::enumerator::{ArrayKeyVersionedItemEnumerator, MergeEnumerator, StoreEnumerator};
use crate::error::{Result, StoreError};
use crate::item::{StoreKey, StoreValue};
use crate::metadata::{remove_if_exists, FileMetadata, MetadataManager, MetadataTable};

use super::components::{Generation, ItemArray};
use super::TStore;

/// Checkpoint progress between the three phases
pub(crate) struct CheckpointState<K, V> {
    pub(crate) prepared_lsn: Option<i64>,
    pub(crate) next: Option<NextGeneration<K, V>>,
}

impl<K, V> Default for CheckpointState<K, V> {
    fn default() -> Self {
        Self {
            prepared_lsn: None,
            next: None,
        }
    }
}

/// A performed checkpoint awaiting completion
pub(crate) struct NextGeneration<K, V> {
    pub(crate) lsn: i64,
    pub(crate) generation: Arc<Generation<K, V>>,
    /// File pair written by perform (none for an empty delta)
    pub(crate) new_file: Option<Arc<FileMetadata>>,
}

impl<K: StoreKey, V: StoreValue> TStore<K, V> {
    /// Freeze the differential as the delta of a checkpoint at `lsn`.
    ///
    /// A second prepare before perform folds the newer writes into the
    /// existing delta.
    pub fn prepare_checkpoint(&self, lsn: i64) -> Result<()> {
        assert!(lsn >= 0, "checkpoint LSN {} is not a real checkpoint", lsn);
        self.check_open()?;

        let mut state = self.checkpoint.lock();
        assert!(
            state.next.is_none(),
            "prepare_checkpoint while a performed checkpoint awaits completion"
        );
        if let Some(previous) = state.prepared_lsn {
            assert!(
                lsn >= previous,
                "prepared LSN {} moves backwards from {}",
                lsn,
                previous
            );
        }
        let current_lsn = self.checkpoint_lsn();
        assert!(
            lsn >= current_lsn,
            "prepared LSN {} precedes the current checkpoint {}",
            lsn,
            current_lsn
        );

        // Between two writes: no write may straddle the freeze
        let _guard = self.write_lock.lock();
        let mut components = self.components.write();
        let frozen = std::mem::replace(
            &mut components.differential,
            Arc::new(DifferentialComponent::new()),
        );
        let delta_keys = match &components.delta {
            Some(delta) => {
                delta.absorb(&frozen);
                delta.len()
            }
            None => {
                let keys = frozen.len();
                components.delta = Some(frozen);
                keys
            }
        };
        state.prepared_lsn = Some(lsn);

        tracing::info!(lsn, delta_keys, "Prepared checkpoint");
        Ok(())
    }

    /// Write the prepared delta out and stage the next generation.
    ///
    /// Performing twice without completing is a no-op the second time.
    pub fn perform_checkpoint(&self, token: &CancellationToken) -> Result<()> {
        self.check_open()?;
        let mut state = self.checkpoint.lock();
        let lsn = match state.prepared_lsn {
            Some(lsn) => lsn,
            None => panic!("perform_checkpoint called without a prepared checkpoint"),
        };
        if state.next.is_some() {
            tracing::debug!(lsn, "Checkpoint already performed");
            return Ok(());
        }

        let components = self.components.read().clone();
        let delta = components
            .delta
            .clone()
            .unwrap_or_else(|| Arc::new(DifferentialComponent::new()));
        let current = &components.generation;
        assert!(
            lsn >= current.table.checkpoint_lsn(),
            "checkpoint LSN {} precedes the current generation's {}",
            lsn,
            current.table.checkpoint_lsn()
        );

        let next = if self.config.has_persisted_state {
            self.perform_persisted(lsn, &delta, current, token)?
        } else {
            self.perform_volatile(lsn, &delta, current, token)?
        };

        tracing::info!(
            lsn,
            files = next.generation.files.len(),
            new_file = next.new_file.as_ref().map(|f| f.file_id()),
            "Performed checkpoint"
        );
        state.next = Some(next);
        Ok(())
    }

    fn perform_persisted(
        &self,
        lsn: i64,
        delta: &DifferentialComponent<K, V>,
        current: &Arc<Generation<K, V>>,
        token: &CancellationToken,
    ) -> Result<NextGeneration<K, V>> {
        let delta_items: ItemArray<K, V> = delta.snapshot().into();
        let existing = current.files.len();
        let merge_all =
            existing == 0 || existing + 1 > self.config.merge_policy.file_count_threshold;

        // Step 1: Write the new file pair (or none for an empty delta)
        let (new_file, kept) = if delta_items.is_empty() {
            (None, current.files.clone())
        } else {
            let lease = current.table.try_acquire().ok_or(StoreError::Closed)?;
            let mut sources: Vec<Box<dyn StoreEnumerator<K, V> + Send>> =
                vec![Box::new(ArrayKeyVersionedItemEnumerator::new(delta_items))];
            if merge_all {
                sources.extend(current.enumerators(Some(&lease), &..));
            }
            let mut merged = MergeEnumerator::new(sources);

            let file_id = self.next_file_id.fetch_add(1, Ordering::AcqRel);
            let metadata = CheckpointWriter::new(&self.config.work_dir, file_id)
                .sync(self.config.sync_files)
                .drop_tombstones(merge_all)
                .write(&mut merged, &current.source_files(), token)?;
            let kept = if merge_all {
                Vec::new()
            } else {
                current.files.clone()
            };

            if metadata.total_number_of_entries() == 0 {
                // Everything merged away
                remove_if_exists(&metadata.key_file_path())?;
                remove_if_exists(&metadata.value_file_path())?;
                (None, kept)
            } else {
                let metadata = Arc::new(metadata);
                match CheckpointFile::open(&metadata) {
                    Ok(file) => {
                        let mut files = vec![Arc::new(file)];
                        files.extend(kept);
                        (Some(metadata), files)
                    }
                    Err(e) => {
                        metadata.mark_for_deletion();
                        return Err(e);
                    }
                }
            }
        };

        // Step 2: Build the next table
        let table = self.next_table(lsn, current);
        for file in &kept {
            if let Some(metadata) = &new_file {
                if metadata.file_id() == file.file_id() {
                    table.add_file(Arc::clone(metadata));
                    continue;
                }
            }
            let metadata = current.table.file(file.file_id()).ok_or_else(|| {
                StoreError::Corruption(format!(
                    "checkpoint file {} missing from the metadata table",
                    file.file_id()
                ))
            })?;
            table.add_file(metadata);
        }

        let next = NextGeneration {
            lsn,
            generation: Arc::new(Generation::new(table, kept, Vec::new().into())),
            new_file,
        };

        // Step 3: Stage the next metadata file
        let temp = MetadataManager::temp_path(&self.config.work_dir);
        if let Err(e) = MetadataManager::write(&next.generation.table, &temp, self.config.sync_files) {
            self.discard_next(next);
            return Err(e);
        }
        Ok(next)
    }

    fn perform_volatile(
        &self,
        lsn: i64,
        delta: &DifferentialComponent<K, V>,
        current: &Arc<Generation<K, V>>,
        token: &CancellationToken,
    ) -> Result<NextGeneration<K, V>> {
        let mut sources: Vec<Box<dyn StoreEnumerator<K, V> + Send>> =
            vec![Box::new(ArrayKeyVersionedItemEnumerator::from(delta.snapshot()))];
        sources.extend(current.enumerators(None, &..));
        let mut merged = MergeEnumerator::new(sources);

        let mut items = Vec::new();
        while merged.move_next() {
            token.check()?;
            let (key, item) = merged.current();
            if !item.is_deleted() {
                items.push((key.clone(), Arc::clone(item)));
            }
        }

        let table = self.next_table(lsn, current);
        Ok(NextGeneration {
            lsn,
            generation: Arc::new(Generation::new(table, Vec::new(), items.into())),
            new_file: None,
        })
    }

    fn next_table(&self, lsn: i64, current: &Generation<K, V>) -> Arc<MetadataTable> {
        let table = MetadataTable::with_checkpoint_lsn(current.table.checkpoint_lsn());
        table.set_checkpoint_lsn_expected(true);
        table.set_checkpoint_lsn(lsn);
        table
    }

    /// Publish the performed generation
    pub fn complete_checkpoint(&self) -> Result<()> {
        self.check_open()?;
        let mut state = self.checkpoint.lock();
        let next = match state.next.take() {
            Some(next) => next,
            None => panic!("complete_checkpoint called without a performed checkpoint"),
        };

        if self.config.has_persisted_state {
            let dir = &self.config.work_dir;
            if let Err(e) = MetadataManager::safe_file_replace(
                &MetadataManager::current_path(dir),
                &MetadataManager::temp_path(dir),
                &MetadataManager::backup_path(dir),
            ) {
                state.next = Some(next);
                return Err(e);
            }
        }

        let old = {
            let mut components = self.components.write();
            components.delta = None;
            std::mem::replace(&mut components.generation, Arc::clone(&next.generation))
        };
        state.prepared_lsn = None;
        self.retire(&old, &next.generation.table);

        tracing::info!(
            lsn = next.lsn,
            files = next.generation.files.len(),
            "Completed checkpoint"
        );
        Ok(())
    }

    /// Prepare, perform and complete a checkpoint at `lsn`
    pub fn checkpoint(&self, lsn: i64, token: &CancellationToken) -> Result<()> {
        self.prepare_checkpoint(lsn)?;
        self.perform_checkpoint(token)?;
        self.complete_checkpoint()
    }

    /// Whether a checkpoint has been prepared and not yet completed
    pub fn has_pending_checkpoint(&self) -> bool {
        self.checkpoint.lock().prepared_lsn.is_some()
    }

    /// Drop a performed-but-not-completed generation and its new file
    pub(crate) fn discard_next(&self, next: NextGeneration<K, V>) {
        if let Some(file) = &next.new_file {
            file.mark_for_deletion();
        }
        next.generation.table.begin_close();
        if self.config.has_persisted_state {
            let temp = MetadataManager::temp_path(&self.config.work_dir);
            if let Err(e) = remove_if_exists(&temp) {
                tracing::warn!("Failed to remove {}: {}", temp.display(), e);
            }
        }
        tracing::debug!(lsn = next.lsn, "Discarded performed checkpoint");
    }

    /// Close a superseded generation; files the new table dropped are deleted
    /// once its readers drain
    pub(crate) fn retire(&self, old: &Generation<K, V>, current: &MetadataTable) {
        for file in old.table.files() {
            if !current.contains_file(file.file_id()) {
                file.mark_for_deletion();
            }
        }
        old.table.begin_close();
    }
}
