//! Store Module
//!
//! `TStore` coordinates all components behind the replicated operation
//! vocabulary.
//!
//! ## Responsibilities
//! - Apply writes to the differential component (primary path and replay)
//! - Answer latest and snapshot reads across differential, delta and files
//! - Drive the three checkpoint phases and publish each new generation
//! - Send and receive copies, promoting a received copy as a new generation
//! - Recover the last durable generation on open

mod checkpointing;
mod components;
mod operation;
mod read;
mod replication;
mod snapshot;

use std::fs;
use std::ops::RangeBounds;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::checkpoint::{parse_checkpoint_file_id, CheckpointFile};
use crate::config::Config;
use crate::differential::{DifferentialComponent, SnapshotRegistry};
use crate::enumerator::{RecoveryStoreEnumerator, StoreEnumerator};
use crate::error::{Result, StoreError};
use crate::item::{StoreKey, StoreValue, VersionedItem, INVALID_LSN};
use crate::metadata::{remove_if_exists, FileMetadata, MetadataManager, MetadataTable};

pub use operation::{
    MetadataOperationType, OperationRecord, StoreOperation, OPERATION_FLAG_HAS_TTL,
    OPERATION_RECORD_HEADER_SIZE, OPERATION_RECORD_VERSION,
};
pub use read::StoreComponentReadResult;
pub use snapshot::StoreSnapshot;

use checkpointing::CheckpointState;
use components::{ComponentView, Components, Generation};
use replication::ReceiveSession;

/// Directory (inside the work folder) where incoming copies are staged
pub const COPY_STAGING_DIR: &str = "copy_staging";

/// The replicated, checkpointed, versioned key-value store
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader
///
/// - **Writes** (add/update/remove/clear/apply): serialized by `write_lock`.
///   The replication layer already orders them; the lock makes the
///   existence checks and the insert atomic.
/// - **Reads**: lock-free apart from the brief `components` read lock used to
///   pin a consistent view plus a lease on its generation.
/// - **Checkpoint phases**: serialized by the `checkpoint` mutex. Prepare also
///   takes `write_lock` to freeze the differential between two writes.
pub struct TStore<K: StoreKey, V: StoreValue> {
    config: Config,

    /// Differential, delta and current generation, swapped as a unit
    components: RwLock<Components<K, V>>,

    /// Serializes write operations, differential freezing, snapshot
    /// registration and garbage collection
    write_lock: Mutex<()>,

    /// Prepared LSN and the performed-but-not-completed generation
    checkpoint: Mutex<CheckpointState<K, V>>,

    /// Incoming copy, between begin and end of setting current state
    copy_session: Mutex<Option<ReceiveSession>>,

    snapshots: Arc<SnapshotRegistry>,
    next_file_id: AtomicU32,

    /// Highest sequence number applied; new snapshots read at this point
    last_sequence_number: AtomicI64,

    paused: AtomicBool,
    closed: AtomicBool,
}

impl<K: StoreKey, V: StoreValue> TStore<K, V> {
    /// Open or create a store with the given config
    ///
    /// On startup (persisted store):
    /// 1. Restore metadata files left by an interrupted replace
    /// 2. Load the current metadata table
    /// 3. Open and validate every checkpoint file it references
    /// 4. Delete checkpoint files no generation references
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let (generation, next_file_id) = if config.has_persisted_state {
            // Step 1: Create the work folder and drop any half-received copy
            fs::create_dir_all(&config.work_dir)?;
            let staging = config.work_dir.join(COPY_STAGING_DIR);
            if staging.exists() {
                tracing::info!("Removing stale copy staging directory {}", staging.display());
                fs::remove_dir_all(&staging)?;
            }

            // Step 2: Recover the last durable generation
            Self::recover(&config.work_dir)?
        } else {
            (Generation::empty(MetadataTable::new()), 1)
        };

        let last_sequence_number = generation
            .max_sequence_number()
            .unwrap_or(INVALID_LSN)
            .max(generation.table.checkpoint_lsn());

        tracing::info!(
            dir = %config.work_dir.display(),
            persisted = config.has_persisted_state,
            lsn = generation.table.checkpoint_lsn(),
            files = generation.files.len(),
            "Opened store"
        );

        Ok(Self {
            config,
            components: RwLock::new(Components {
                differential: Arc::new(DifferentialComponent::new()),
                delta: None,
                generation: Arc::new(generation),
            }),
            write_lock: Mutex::new(()),
            checkpoint: Mutex::new(CheckpointState::default()),
            copy_session: Mutex::new(None),
            snapshots: SnapshotRegistry::new(),
            next_file_id: AtomicU32::new(next_file_id),
            last_sequence_number: AtomicI64::new(last_sequence_number),
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Open a persisted store at `path` with default settings
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().work_dir(path).build()?)
    }

    fn recover(dir: &Path) -> Result<(Generation<K, V>, u32)> {
        let table = match MetadataManager::recover_files(dir)? {
            Some(path) => MetadataManager::open(&path, dir)?,
            None => MetadataTable::new(),
        };

        // Newest first
        let mut files = Vec::with_capacity(table.file_count());
        for metadata in table.files().iter().rev() {
            let file = Arc::new(CheckpointFile::open(metadata)?);
            Self::validate_recovered_file(&file, metadata)?;
            files.push(file);
        }

        let mut max_file_id = table.max_file_id().unwrap_or(0);
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if let Some(file_id) = parse_checkpoint_file_id(&path) {
                max_file_id = max_file_id.max(file_id);
                if !table.contains_file(file_id) {
                    tracing::warn!("Deleting orphan checkpoint file {}", path.display());
                    remove_if_exists(&path)?;
                }
            }
        }

        Ok((Generation::new(table, files, Vec::new().into()), max_file_id + 1))
    }

    /// Cross-check a recovered file's contents against its metadata entry
    fn validate_recovered_file(file: &Arc<CheckpointFile<K, V>>, metadata: &FileMetadata) -> Result<()> {
        let mut enumerator = RecoveryStoreEnumerator::new(Arc::clone(file), None);
        let mut valid = 0u64;
        let mut deleted = 0u64;
        while enumerator.move_next() {
            let (_, item) = enumerator.current();
            if item.is_deleted() {
                deleted += 1;
            } else {
                valid += 1;
            }
        }

        if valid != metadata.number_of_valid_entries()
            || deleted != metadata.number_of_deleted_entries()
        {
            return Err(StoreError::Corruption(format!(
                "{}: {} valid / {} deleted entries, metadata records {} / {}",
                metadata.file_name(),
                valid,
                deleted,
                metadata.number_of_valid_entries(),
                metadata.number_of_deleted_entries()
            )));
        }
        tracing::debug!(file_id = metadata.file_id(), valid, deleted, "Recovered checkpoint file");
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Pin the current components and lease their generation
    fn view(&self) -> Result<ComponentView<K, V>> {
        loop {
            self.check_open()?;
            let components = self.components.read().clone();
            if let Some(lease) = components.generation.table.try_acquire() {
                return Ok(ComponentView::new(components, lease));
            }
            // The generation was retired between the clone and the lease
        }
    }

    /// Latest version of `key` with its value
    pub fn read(&self, key: &K) -> Result<StoreComponentReadResult<V>> {
        self.view()?.read(key)
    }

    /// Latest value of `key`
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        Ok(self.read(key)?.into_value())
    }

    pub fn contains_key(&self, key: &K) -> Result<bool> {
        Ok(self.read(key)?.has_value())
    }

    /// Register a read snapshot at the last applied sequence number
    pub fn snapshot(&self) -> Result<StoreSnapshot<K, V>> {
        // No write or collection may land between picking the sequence
        // number and pinning the components it is read against
        let _guard = self.write_lock.lock();
        let snapshot = self.snapshots.register(self.last_sequence_number());
        let view = self.view()?;
        Ok(StoreSnapshot::new(snapshot, view))
    }

    /// Value of `key` as `snapshot` sees it
    pub fn get_at(&self, key: &K, snapshot: &StoreSnapshot<K, V>) -> Result<Option<V>> {
        snapshot.get(key)
    }

    /// Every visible (key, value) pair in key order
    pub fn entries(&self) -> Result<Vec<(K, V)>> {
        let view = self.view()?;
        let mut enumerator = view.enumerate();
        view.collect_values(&mut enumerator)
    }

    /// Visible keys in `range`, in key order
    pub fn keys<R: RangeBounds<K>>(&self, range: R) -> Result<Vec<K>> {
        let view = self.view()?;
        let mut enumerator = view.enumerate_range(&range, None);
        let keys = view.collect_keys(&mut enumerator);
        tracing::trace!(keys = keys.len(), "Enumerated key range");
        Ok(keys)
    }

    /// Visible (key, value) pairs in `range`, in key order
    pub fn range<R: RangeBounds<K>>(&self, range: R) -> Result<Vec<(K, V)>> {
        let view = self.view()?;
        let mut enumerator = view.enumerate_range(&range, None);
        view.collect_values(&mut enumerator)
    }

    /// Number of visible keys
    pub fn len(&self) -> Result<usize> {
        let view = self.view()?;
        let mut enumerator = view.enumerate();
        let mut count = 0;
        while enumerator.move_next() {
            if !enumerator.current().1.is_deleted() {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Versions of `key` still held in memory (differential and delta),
    /// newest first
    pub fn differential_versions(&self, key: &K) -> Vec<Arc<VersionedItem<V>>> {
        self.components.read().in_memory_versions(key)
    }

    // =========================================================================
    // Writes (primary path)
    // =========================================================================

    /// Insert a key that does not exist
    pub fn add(&self, key: K, value: V, sequence_number: i64) -> Result<()> {
        self.write(key, sequence_number, |current| {
            if current.is_some_and(|item| !item.is_deleted()) {
                return Err(StoreError::KeyAlreadyExists);
            }
            Ok(VersionedItem::inserted(value, sequence_number))
        })
    }

    /// Insert a key that does not exist, with a time-to-live (milliseconds)
    pub fn add_with_ttl(&self, key: K, value: V, ttl: u64, sequence_number: i64) -> Result<()> {
        self.write(key, sequence_number, |current| {
            if current.is_some_and(|item| !item.is_deleted()) {
                return Err(StoreError::KeyAlreadyExists);
            }
            Ok(VersionedItem::inserted(value, sequence_number).with_ttl(ttl))
        })
    }

    /// Replace the value of an existing key.
    ///
    /// With `expected_version`, the current version must have been written at
    /// exactly that sequence number.
    pub fn update(
        &self,
        key: K,
        value: V,
        sequence_number: i64,
        expected_version: Option<i64>,
    ) -> Result<()> {
        self.write(key, sequence_number, |current| {
            check_existing(current, expected_version)?;
            Ok(VersionedItem::updated(value, sequence_number))
        })
    }

    /// Replace the value of an existing key and give the new version a
    /// time-to-live (milliseconds)
    pub fn update_with_ttl(
        &self,
        key: K,
        value: V,
        ttl: u64,
        sequence_number: i64,
        expected_version: Option<i64>,
    ) -> Result<()> {
        self.write(key, sequence_number, |current| {
            check_existing(current, expected_version)?;
            Ok(VersionedItem::updated(value, sequence_number).with_ttl(ttl))
        })
    }

    /// Replace the value of an existing key; never creates one
    pub fn partial_update(&self, key: K, value: V, sequence_number: i64) -> Result<()> {
        self.write(key, sequence_number, |current| {
            check_existing(current, None)?;
            Ok(VersionedItem::updated(value, sequence_number))
        })
    }

    /// Delete an existing key (writes a tombstone)
    pub fn remove(&self, key: K, sequence_number: i64, expected_version: Option<i64>) -> Result<()> {
        self.write(key, sequence_number, |current| {
            check_existing(current, expected_version)?;
            Ok(VersionedItem::deleted(sequence_number))
        })
    }

    /// Tombstone every visible key at `sequence_number`
    pub fn clear(&self, sequence_number: i64) -> Result<usize> {
        self.check_writable()?;
        let _guard = self.write_lock.lock();
        self.clear_locked(sequence_number)
    }

    fn clear_locked(&self, sequence_number: i64) -> Result<usize> {
        let view = self.view()?;
        let differential = Arc::clone(&self.components.read().differential);

        let mut enumerator = view.enumerate();
        let mut cleared = 0;
        while enumerator.move_next() {
            let (key, item) = enumerator.current();
            if item.is_deleted() || item.version_sequence_number() >= sequence_number {
                continue;
            }
            if differential.add(key.clone(), VersionedItem::deleted(sequence_number)) {
                cleared += 1;
            }
        }
        self.observe_sequence_number(sequence_number);

        tracing::debug!(sequence_number, cleared, "Cleared store");
        Ok(cleared)
    }

    /// Common write path: replay check, caller's precondition, insert
    fn write<F>(&self, key: K, sequence_number: i64, make_item: F) -> Result<()>
    where
        F: FnOnce(Option<&Arc<VersionedItem<V>>>) -> Result<VersionedItem<V>>,
    {
        self.check_writable()?;
        let _guard = self.write_lock.lock();
        let components = self.components.read().clone();
        let current = components.latest_item(&key);

        if let Some(item) = &current {
            if sequence_number <= item.version_sequence_number() {
                tracing::trace!(
                    ?key,
                    sequence_number,
                    current = item.version_sequence_number(),
                    "Ignoring replayed write"
                );
                return Ok(());
            }
        }

        let item = make_item(current.as_ref())?;
        components.differential.add(key, item);
        self.observe_sequence_number(sequence_number);
        Ok(())
    }

    // =========================================================================
    // Replay (secondary path)
    // =========================================================================

    /// Apply a logged operation without primary-side existence checks.
    ///
    /// Returns false when the record was skipped: already covered by the
    /// checkpoint, a replayed duplicate, or an operation with no data effect.
    pub fn apply(&self, record: &OperationRecord, sequence_number: i64) -> Result<bool> {
        self.check_writable()?;
        let checkpoint_lsn = self.checkpoint_lsn();
        if sequence_number <= checkpoint_lsn {
            tracing::trace!(sequence_number, checkpoint_lsn, "Skipping checkpointed record");
            return Ok(false);
        }

        let missing = |what: &str| {
            StoreError::Corruption(format!("{:?} record without a {}", record.operation(), what))
        };

        match record.operation() {
            StoreOperation::Add | StoreOperation::Update | StoreOperation::PartialUpdate => {
                let key: K = record.key()?.ok_or_else(|| missing("key"))?;
                let value: V = record.value()?.ok_or_else(|| missing("value"))?;
                let ttl = record.ttl();
                self.replay(key, sequence_number, |current| {
                    let item = match current {
                        Some(item) if !item.is_deleted() => {
                            VersionedItem::updated(value, sequence_number)
                        }
                        _ => VersionedItem::inserted(value, sequence_number),
                    };
                    match ttl {
                        Some(ttl) => item.with_ttl(ttl),
                        None => item,
                    }
                })
            }
            StoreOperation::Remove => {
                let key: K = record.key()?.ok_or_else(|| missing("key"))?;
                self.replay(key, sequence_number, |_| VersionedItem::deleted(sequence_number))
            }
            StoreOperation::Clear => {
                let _guard = self.write_lock.lock();
                self.clear_locked(sequence_number)?;
                Ok(true)
            }
            StoreOperation::Get
            | StoreOperation::Checkpoint
            | StoreOperation::Copy
            | StoreOperation::Pause => Ok(false),
        }
    }

    fn replay<F>(&self, key: K, sequence_number: i64, make_item: F) -> Result<bool>
    where
        F: FnOnce(Option<&Arc<VersionedItem<V>>>) -> VersionedItem<V>,
    {
        let _guard = self.write_lock.lock();
        let components = self.components.read().clone();
        let current = components.latest_item(&key);
        if current
            .as_ref()
            .is_some_and(|item| sequence_number <= item.version_sequence_number())
        {
            tracing::trace!(?key, sequence_number, "Ignoring replayed record");
            return Ok(false);
        }

        let item = make_item(current.as_ref());
        let applied = components.differential.add(key, item);
        self.observe_sequence_number(sequence_number);
        Ok(applied)
    }

    fn observe_sequence_number(&self, sequence_number: i64) {
        self.last_sequence_number
            .fetch_max(sequence_number, Ordering::AcqRel);
    }

    // =========================================================================
    // Pause / Garbage Collection
    // =========================================================================

    /// Reject writes until `resume`. Reads, checkpoints and copies continue.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        tracing::info!("Store paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        tracing::info!("Store resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Reclaim in-memory versions no active snapshot can see
    pub fn collect_garbage(&self) -> usize {
        let _guard = self.write_lock.lock();
        let oldest_active = self.snapshots.oldest_active();
        let components = self.components.read().clone();
        let mut reclaimed = components.differential.prune(oldest_active);
        if let Some(delta) = &components.delta {
            reclaimed += delta.prune(oldest_active);
        }
        tracing::debug!(?oldest_active, reclaimed, "Collected superseded versions");
        reclaimed
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Close the store: discard unfinished work and wait (bounded) for the
    /// current generation's readers to drain
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(session) = self.copy_session.lock().take() {
            session.discard()?;
        }
        {
            let mut state = self.checkpoint.lock();
            state.prepared_lsn = None;
            if let Some(next) = state.next.take() {
                self.discard_next(next);
            }
        }

        let generation = Arc::clone(&self.components.read().generation);
        let timeout = Duration::from_millis(self.config.close_timeout_ms);
        generation.table.close_with_timeout(timeout)?;

        tracing::info!(lsn = generation.table.checkpoint_lsn(), "Closed store");
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        self.check_open()?;
        if self.is_paused() {
            return Err(StoreError::Paused);
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn work_dir(&self) -> &Path {
        &self.config.work_dir
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.config.work_dir.join(COPY_STAGING_DIR)
    }

    /// LSN of the current durable generation (`INVALID_LSN` before the first)
    pub fn checkpoint_lsn(&self) -> i64 {
        self.components.read().generation.table.checkpoint_lsn()
    }

    pub fn last_sequence_number(&self) -> i64 {
        self.last_sequence_number.load(Ordering::Acquire)
    }

    /// Metadata table of the current generation
    pub fn metadata_table(&self) -> Arc<MetadataTable> {
        Arc::clone(&self.components.read().generation.table)
    }

    /// Number of checkpoint files in the current generation
    pub fn file_count(&self) -> usize {
        self.components.read().generation.files.len()
    }

    /// Number of in-memory versions (differential and delta)
    pub fn differential_version_count(&self) -> usize {
        let components = self.components.read();
        components.differential.version_count()
            + components.delta.as_ref().map_or(0, |delta| delta.version_count())
    }

    pub fn active_snapshot_count(&self) -> usize {
        self.snapshots.active_count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Existence and conditional-version check for update/remove
fn check_existing<V>(
    current: Option<&Arc<VersionedItem<V>>>,
    expected_version: Option<i64>,
) -> Result<()> {
    let item = match current {
        Some(item) if !item.is_deleted() => item,
        _ => return Err(StoreError::KeyNotFound),
    };
    if let Some(expected) = expected_version {
        let actual = item.version_sequence_number();
        if expected != actual {
            return Err(StoreError::VersionMismatch { expected, actual });
        }
    }
    Ok(())
}
