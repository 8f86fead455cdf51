//! MetadataTable implementation
//!
//! One table per checkpoint generation. The reference count and the closing
//! flag share a single atomic word so that `try_add_reference` can never
//! succeed after `begin_close` has been observed.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::{Result, StoreError};
use crate::item::INVALID_LSN;

use super::FileMetadata;

/// High bit of the state word: no new references accepted
const CLOSING_BIT: u64 = 1 << 63;

/// Low bits of the state word: live references
const COUNT_MASK: u64 = !CLOSING_BIT;

/// Registry of the checkpoint files that make up one durable generation
pub struct MetadataTable {
    checkpoint_lsn: AtomicI64,
    metadata_file_size: AtomicU64,
    table: RwLock<BTreeMap<u32, Arc<FileMetadata>>>,

    /// CLOSING_BIT | reference count. Starts at 1: the owner's reference.
    state: AtomicU64,

    /// When set, every checkpoint LSN assigned must be a real, monotonic one
    checkpoint_lsn_expected: AtomicBool,

    drained: Mutex<bool>,
    drained_cv: Condvar,
}

impl MetadataTable {
    /// New table with no checkpoint associated
    pub fn new() -> Arc<Self> {
        Self::with_checkpoint_lsn(INVALID_LSN)
    }

    pub fn with_checkpoint_lsn(checkpoint_lsn: i64) -> Arc<Self> {
        Arc::new(Self {
            checkpoint_lsn: AtomicI64::new(checkpoint_lsn),
            metadata_file_size: AtomicU64::new(0),
            table: RwLock::new(BTreeMap::new()),
            state: AtomicU64::new(1),
            checkpoint_lsn_expected: AtomicBool::new(false),
            drained: Mutex::new(false),
            drained_cv: Condvar::new(),
        })
    }

    // =========================================================================
    // Contents (frozen once closing begins)
    // =========================================================================

    pub fn checkpoint_lsn(&self) -> i64 {
        self.checkpoint_lsn.load(Ordering::Acquire)
    }

    /// Whether a real checkpoint has been associated with this generation
    pub fn has_checkpoint(&self) -> bool {
        self.checkpoint_lsn() >= 0
    }

    pub fn set_checkpoint_lsn(&self, lsn: i64) {
        self.assert_not_closing("set checkpoint LSN");
        if self.checkpoint_lsn_expected.load(Ordering::Acquire) {
            assert!(lsn >= 0, "checkpoint LSN {} is not a real checkpoint", lsn);
            let current = self.checkpoint_lsn();
            assert!(
                lsn >= current,
                "checkpoint LSN {} moves backwards from {}",
                lsn,
                current
            );
        }
        self.checkpoint_lsn.store(lsn, Ordering::Release);
    }

    /// Require every later `set_checkpoint_lsn` to carry a real, monotonic LSN
    pub fn set_checkpoint_lsn_expected(&self, expected: bool) {
        self.checkpoint_lsn_expected.store(expected, Ordering::Release);
    }

    pub fn metadata_file_size(&self) -> u64 {
        self.metadata_file_size.load(Ordering::Acquire)
    }

    pub fn set_metadata_file_size(&self, size: u64) {
        self.assert_not_closing("set metadata file size");
        self.metadata_file_size.store(size, Ordering::Release);
    }

    /// Register a file in this generation (the generation references it)
    pub fn add_file(&self, file: Arc<FileMetadata>) {
        self.assert_not_closing("add file");
        let mut table = self.table.write();
        assert!(
            !table.contains_key(&file.file_id()),
            "file {} already in metadata table",
            file.file_id()
        );
        file.add_reference();
        table.insert(file.file_id(), file);
    }

    /// Unregister a file; the generation's reference on it is released
    pub fn remove_file(&self, file_id: u32) -> Option<Arc<FileMetadata>> {
        self.assert_not_closing("remove file");
        let removed = self.table.write().remove(&file_id);
        if let Some(file) = &removed {
            file.release_reference();
        }
        removed
    }

    pub fn file(&self, file_id: u32) -> Option<Arc<FileMetadata>> {
        self.table.read().get(&file_id).cloned()
    }

    pub fn contains_file(&self, file_id: u32) -> bool {
        self.table.read().contains_key(&file_id)
    }

    /// Files ordered by id (oldest first)
    pub fn files(&self) -> Vec<Arc<FileMetadata>> {
        self.table.read().values().cloned().collect()
    }

    pub fn file_count(&self) -> usize {
        self.table.read().len()
    }

    pub fn max_file_id(&self) -> Option<u32> {
        self.table.read().keys().next_back().copied()
    }

    fn assert_not_closing(&self, what: &str) {
        assert!(
            self.state.load(Ordering::Acquire) & CLOSING_BIT == 0,
            "cannot {} on a closed metadata table",
            what
        );
    }

    // =========================================================================
    // Reference counting
    // =========================================================================

    pub fn reference_count(&self) -> u64 {
        self.state.load(Ordering::Acquire) & COUNT_MASK
    }

    pub fn is_closing(&self) -> bool {
        self.state.load(Ordering::Acquire) & CLOSING_BIT != 0
    }

    /// Whether every reference (the owner's included) has been released
    pub fn is_drained(&self) -> bool {
        *self.drained.lock()
    }

    /// Take a reference. Panics if closing has begun; use
    /// `try_add_reference` where racing with a closer is possible.
    pub fn add_reference(&self) {
        assert!(
            self.try_add_reference(),
            "reference added to a closed metadata table"
        );
    }

    /// Take a reference unless closing has begun
    pub fn try_add_reference(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current & CLOSING_BIT != 0 || current & COUNT_MASK == 0 {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Take a reference and wrap it in a lease released on drop
    pub fn try_acquire(self: &Arc<Self>) -> Option<MetadataLease> {
        if self.try_add_reference() {
            Some(MetadataLease {
                table: Arc::clone(self),
            })
        } else {
            None
        }
    }

    /// Drop a reference. The last one drains the table.
    pub fn release_reference(&self) {
        let previous = self.state.fetch_sub(1, Ordering::AcqRel);
        let count = previous & COUNT_MASK;
        assert!(count > 0, "metadata table reference count underflow");
        if count == 1 {
            assert!(
                previous & CLOSING_BIT != 0,
                "metadata table reference count reached zero before close"
            );
            self.on_drained();
        }
    }

    /// Reference held by an existing lease; legal while closing
    fn retain(&self) {
        let previous = self.state.fetch_add(1, Ordering::AcqRel);
        assert!(
            previous & COUNT_MASK > 0,
            "lease cloned from a drained metadata table"
        );
    }

    fn on_drained(&self) {
        let files = self.files();
        tracing::debug!(
            lsn = self.checkpoint_lsn(),
            files = files.len(),
            "Metadata table drained"
        );
        for file in files {
            file.release_reference();
        }

        let mut drained = self.drained.lock();
        *drained = true;
        self.drained_cv.notify_all();
    }

    // =========================================================================
    // Closing
    // =========================================================================

    /// Stop accepting references and release the owner's. Does not wait.
    ///
    /// Returns false if closing had already begun.
    pub fn begin_close(&self) -> bool {
        let previous = self.state.fetch_or(CLOSING_BIT, Ordering::AcqRel);
        if previous & CLOSING_BIT != 0 {
            return false;
        }
        tracing::debug!(
            lsn = self.checkpoint_lsn(),
            outstanding = (previous & COUNT_MASK).saturating_sub(1),
            "Closing metadata table"
        );
        self.release_reference();
        true
    }

    /// Close and wait for every outstanding reference to drain
    pub fn close(&self) {
        self.begin_close();
        let mut drained = self.drained.lock();
        while !*drained {
            self.drained_cv.wait(&mut drained);
        }
    }

    /// Close and wait at most `timeout` for the drain
    pub fn close_with_timeout(&self, timeout: Duration) -> Result<()> {
        self.begin_close();
        let mut drained = self.drained.lock();
        while !*drained {
            if self.drained_cv.wait_for(&mut drained, timeout).timed_out() && !*drained {
                return Err(StoreError::Timeout(format!(
                    "metadata table drain ({} references outstanding)",
                    self.reference_count()
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for MetadataTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataTable")
            .field("checkpoint_lsn", &self.checkpoint_lsn())
            .field("files", &self.table.read().keys().collect::<Vec<_>>())
            .field("reference_count", &self.reference_count())
            .field("closing", &self.is_closing())
            .finish()
    }
}

/// A counted reference on a metadata table, released on drop
pub struct MetadataLease {
    table: Arc<MetadataTable>,
}

impl MetadataLease {
    pub fn table(&self) -> &Arc<MetadataTable> {
        &self.table
    }
}

impl Deref for MetadataLease {
    type Target = MetadataTable;

    fn deref(&self) -> &MetadataTable {
        &self.table
    }
}

impl Clone for MetadataLease {
    fn clone(&self) -> Self {
        self.table.retain();
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl Drop for MetadataLease {
    fn drop(&mut self) {
        self.table.release_reference();
    }
}

impl std::fmt::Debug for MetadataLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MetadataLease").field(&*self.table).finish()
    }
}
