//! Store copy: sending the current generation and promoting a received one

use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::checkpoint::{checkpoint_file_name, key_file_path, value_file_path, CheckpointFile};
use crate::copy::{
    CopiedState, CopyFrame, CopySession, CopyStream, CopyTransport, StoreCopyStream,
    VolatileCopySession, VolatileCopyStream, VolatileRecord,
};
use crate::differential::DifferentialComponent;
use crate::enumerator::StoreEnumerator;
use crate::error::{Result, StoreError};
use crate::item::{
    self, ItemValue, StoreKey, StoreValue, VersionedItem, INVALID_LSN, OPEN_SEQUENCE_NUMBER,
    ZERO_LSN,
};
use crate::metadata::{FileMetadata, MetadataManager, MetadataTable};

use super::components::{Components, Generation};
use super::TStore;

/// Receiving side of a copy, by store flavour
pub(crate) enum ReceiveSession {
    Persisted(CopySession),
    Volatile(VolatileCopySession),
}

impl ReceiveSession {
    fn advance(&mut self, frame: &CopyFrame) -> Result<()> {
        match self {
            ReceiveSession::Persisted(session) => session.advance(frame),
            ReceiveSession::Volatile(session) => session.advance(frame),
        }
    }

    fn is_completed(&self) -> bool {
        match self {
            ReceiveSession::Persisted(session) => session.is_completed(),
            ReceiveSession::Volatile(session) => session.is_completed(),
        }
    }

    pub(crate) fn discard(self) -> Result<()> {
        match self {
            ReceiveSession::Persisted(session) => session.discard(),
            ReceiveSession::Volatile(_) => {
                tracing::info!("Discarded incomplete volatile store copy");
                Ok(())
            }
        }
    }
}

impl<K: StoreKey, V: StoreValue> TStore<K, V> {
    // =========================================================================
    // Sending
    // =========================================================================

    /// Frame stream for the current state.
    ///
    /// A persisted store sends its current generation (the last completed
    /// checkpoint) and keeps it leased until the stream is dropped. A volatile
    /// store sends every visible item.
    pub fn copy_stream(&self) -> Result<CopyStream> {
        let view = self.view()?;
        let chunk_size = self.config.copy_chunk_size;

        if self.config.has_persisted_state {
            let stream = StoreCopyStream::new(view.lease().clone(), chunk_size);
            return Ok(CopyStream::Persisted(stream));
        }

        let mut records = Vec::new();
        let mut enumerator = view.enumerate();
        while enumerator.move_next() {
            let (key, item) = enumerator.current();
            if item.is_deleted() {
                continue;
            }
            let value = view.read_value(item)?.ok_or_else(|| {
                StoreError::Corruption(format!("visible item for {:?} has no value", key))
            })?;
            records.push(VolatileRecord {
                kind: item.kind(),
                version_sequence_number: item.version_sequence_number(),
                key: item::encode(key)?,
                value: item::encode(&value)?,
                ttl: item.ttl(),
            });
        }
        Ok(CopyStream::Volatile(VolatileCopyStream::new(records, chunk_size)))
    }

    /// Send a full copy over `transport`. Returns the number of frames sent.
    pub fn copy_to<T: CopyTransport + ?Sized>(&self, transport: &mut T) -> Result<usize> {
        let mut stream = self.copy_stream()?;
        let mut frames = 0;
        while let Some(frame) = stream.next_frame()? {
            transport.send(&frame)?;
            frames += 1;
        }
        tracing::info!(frames, "Sent store copy");
        Ok(frames)
    }

    // =========================================================================
    // Receiving
    // =========================================================================

    /// Start receiving a copy. Replaces (and discards) any unfinished one.
    pub fn begin_setting_current_state(&self) -> Result<()> {
        // Checked under the slot lock so a concurrent close either sees this
        // session or is seen by it
        let mut slot = self.copy_session.lock();
        self.check_open()?;
        if let Some(previous) = slot.take() {
            tracing::warn!("Replacing an unfinished store copy");
            previous.discard()?;
        }

        let session = if self.config.has_persisted_state {
            ReceiveSession::Persisted(CopySession::new(
                &self.staging_dir(),
                self.next_file_id.load(Ordering::Acquire),
                self.config.sync_files,
            ))
        } else {
            ReceiveSession::Volatile(VolatileCopySession::new())
        };
        *slot = Some(session);
        tracing::info!("Receiving store copy");
        Ok(())
    }

    /// Feed one received frame to the current copy session.
    ///
    /// Fails with `Closed` once the store is closed (close discards the
    /// session) and with `CopyAborted` when no copy is in progress.
    pub fn set_current_state(&self, frame: &CopyFrame) -> Result<()> {
        let mut slot = self.copy_session.lock();
        self.check_open()?;
        match slot.as_mut() {
            Some(session) => session.advance(frame),
            None => Err(StoreError::CopyAborted),
        }
    }

    /// Promote a completed copy as the new current generation.
    ///
    /// An incomplete copy is discarded and `CopyAborted` returned; the store
    /// keeps the state it had before the copy began.
    pub fn end_setting_current_state(&self) -> Result<()> {
        let session = {
            let mut slot = self.copy_session.lock();
            self.check_open()?;
            slot.take().ok_or(StoreError::CopyAborted)?
        };

        if !session.is_completed() {
            session.discard()?;
            return Err(StoreError::CopyAborted);
        }

        match session {
            ReceiveSession::Persisted(session) => self.promote_persisted(session.finish()?),
            ReceiveSession::Volatile(session) => self.promote_volatile(session.finish()?),
        }
    }

    /// Receive a full copy from `transport` and promote it
    pub fn receive_from<T: CopyTransport + ?Sized>(&self, transport: &mut T) -> Result<()> {
        self.begin_setting_current_state()?;
        loop {
            let received = transport.receive().and_then(|frame| match frame {
                Some(frame) => self.set_current_state(&frame).map(|_| true),
                None => Ok(false),
            });
            match received {
                Ok(true) if !self.copy_session_completed() => continue,
                Ok(_) => break,
                Err(e) => {
                    self.abort_copy();
                    return Err(e);
                }
            }
        }
        self.end_setting_current_state()
    }

    fn copy_session_completed(&self) -> bool {
        self.copy_session
            .lock()
            .as_ref()
            .is_some_and(|session| session.is_completed())
    }

    fn abort_copy(&self) {
        if let Some(session) = self.copy_session.lock().take() {
            if let Err(e) = session.discard() {
                tracing::warn!("Failed to discard store copy: {}", e);
            }
        }
    }

    // =========================================================================
    // Promotion
    // =========================================================================

    fn promote_persisted(&self, copied: CopiedState) -> Result<()> {
        let mut state = self.checkpoint.lock();
        if let Err(e) = self.check_open() {
            fs::remove_dir_all(&copied.staging_dir)?;
            return Err(e);
        }
        state.prepared_lsn = None;
        if let Some(next) = state.next.take() {
            self.discard_next(next);
        }

        let table = MetadataTable::with_checkpoint_lsn(copied.checkpoint_lsn);
        let mut files = Vec::with_capacity(copied.files.len());
        let moved = self.move_copied_files(&copied, &table, &mut files);

        if let Err(e) = moved {
            for file in table.files() {
                file.mark_for_deletion();
            }
            table.begin_close();
            if let Err(cleanup) = fs::remove_dir_all(&copied.staging_dir) {
                tracing::warn!("Failed to remove copy staging directory: {}", cleanup);
            }
            return Err(e);
        }
        fs::remove_dir_all(&copied.staging_dir)?;

        // Newest first
        files.reverse();
        let generation = Generation::new(table, files, Vec::new().into());
        self.install_copied(generation);
        Ok(())
    }

    /// Move staged files into the work folder under fresh ids and publish
    /// their metadata table
    fn move_copied_files(
        &self,
        copied: &CopiedState,
        table: &MetadataTable,
        files: &mut Vec<Arc<CheckpointFile<K, V>>>,
    ) -> Result<()> {
        let dir = &self.config.work_dir;
        for copied_file in &copied.files {
            let staged = &copied_file.metadata;
            let file_id = self.next_file_id.fetch_add(1, Ordering::AcqRel);
            let file_name = checkpoint_file_name(file_id);
            fs::rename(staged.key_file_path(), key_file_path(dir, &file_name))?;
            fs::rename(staged.value_file_path(), value_file_path(dir, &file_name))?;

            let metadata = Arc::new(FileMetadata::new(
                dir,
                file_id,
                file_name,
                staged.total_number_of_entries(),
                staged.number_of_valid_entries(),
                staged.number_of_deleted_entries(),
                staged.key_file_size(),
                staged.value_file_size(),
            ));
            table.add_file(Arc::clone(&metadata));
            files.push(Arc::new(CheckpointFile::open(&metadata)?));
            tracing::debug!(
                source_file_id = copied_file.source_file_id,
                file_id,
                "Moved copied checkpoint file"
            );
        }

        let temp = MetadataManager::temp_path(dir);
        MetadataManager::write(table, &temp, self.config.sync_files)?;
        MetadataManager::safe_file_replace(
            &MetadataManager::current_path(dir),
            &temp,
            &MetadataManager::backup_path(dir),
        )
    }

    fn promote_volatile(&self, records: Vec<VolatileRecord>) -> Result<()> {
        let mut items = Vec::with_capacity(records.len());
        for record in records {
            let key: K = item::decode(&record.key)?;
            let value: V = item::decode(&record.value)?;
            let versioned = VersionedItem::from_parts(
                record.kind,
                ItemValue::Memory(value),
                record.version_sequence_number,
                OPEN_SEQUENCE_NUMBER,
                record.ttl,
            );
            items.push((key, Arc::new(versioned)));
        }
        items.sort_by(|a, b| a.0.cmp(&b.0));
        if items.windows(2).any(|pair| pair[0].0 == pair[1].0) {
            return Err(StoreError::Copy("duplicate key in volatile copy".into()));
        }

        let mut state = self.checkpoint.lock();
        self.check_open()?;
        state.prepared_lsn = None;
        if let Some(next) = state.next.take() {
            self.discard_next(next);
        }

        let table = MetadataTable::with_checkpoint_lsn(ZERO_LSN);
        self.install_copied(Generation::new(table, Vec::new(), items.into()));
        Ok(())
    }

    /// Replace every component with a copied generation
    fn install_copied(&self, generation: Generation<K, V>) {
        let generation = Arc::new(generation);
        let lsn = generation.table.checkpoint_lsn();
        let last_sequence_number = generation
            .max_sequence_number()
            .unwrap_or(INVALID_LSN)
            .max(lsn);

        let old = {
            let _guard = self.write_lock.lock();
            let mut components = self.components.write();
            let old = std::mem::replace(
                &mut *components,
                Components {
                    differential: Arc::new(DifferentialComponent::new()),
                    delta: None,
                    generation: Arc::clone(&generation),
                },
            );
            self.last_sequence_number
                .store(last_sequence_number, Ordering::Release);
            old
        };
        self.retire(&old.generation, &generation.table);

        tracing::info!(
            lsn,
            files = generation.files.len(),
            items = generation.memory.len(),
            "Promoted store copy"
        );
    }
}
