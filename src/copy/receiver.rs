//! Persisted copy receiver
//!
//! Rebuilds a generation in a staging directory. Nothing outside the staging
//! directory is touched until the store promotes a completed session.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::checkpoint::{checkpoint_file_name, key_file_path, value_file_path};
use crate::error::{Result, StoreError};
use crate::metadata::{FileMetadata, MetadataManager};

use super::codec::{parse_u32, parse_u64};
use super::{CopyFrame, StoreCopyOperation, COPY_PROTOCOL_VERSION};

/// What the session accepts next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopySessionState {
    ExpectVersion,
    ExpectMetadataTable,
    ExpectStartKeyFile,
    InKeyFile,
    ExpectStartValueFile,
    InValueFile,
    ExpectComplete,
    Completed,
    Failed,
}

/// A file pair rebuilt in the staging directory under a local file id
#[derive(Debug)]
pub struct CopiedFile {
    pub source_file_id: u32,
    pub metadata: FileMetadata,
}

/// The outcome of a completed session
#[derive(Debug)]
pub struct CopiedState {
    pub checkpoint_lsn: i64,
    pub staging_dir: PathBuf,
    pub files: Vec<CopiedFile>,
}

/// Receiving side of one persisted copy
pub struct CopySession {
    staging_dir: PathBuf,
    first_file_id: u32,
    state: CopySessionState,
    checkpoint_lsn: i64,
    source_files: Vec<Arc<FileMetadata>>,
    file_index: usize,
    writer: Option<BufWriter<File>>,
    bytes_written: u64,
    copied: Vec<CopiedFile>,
    sync: bool,
}

impl CopySession {
    /// Incoming files get local ids starting at `first_file_id`
    pub fn new(staging_dir: &Path, first_file_id: u32, sync: bool) -> Self {
        Self {
            staging_dir: staging_dir.to_path_buf(),
            first_file_id,
            state: CopySessionState::ExpectVersion,
            checkpoint_lsn: crate::item::INVALID_LSN,
            source_files: Vec::new(),
            file_index: 0,
            writer: None,
            bytes_written: 0,
            copied: Vec::new(),
            sync,
        }
    }

    pub fn state(&self) -> CopySessionState {
        self.state
    }

    pub fn is_completed(&self) -> bool {
        self.state == CopySessionState::Completed
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Apply one frame. Any error fails the session for good.
    pub fn advance(&mut self, frame: &CopyFrame) -> Result<()> {
        if self.state == CopySessionState::Failed {
            return Err(StoreError::Copy("copy session already failed".into()));
        }
        let result = StoreCopyOperation::try_from(frame.operation())
            .and_then(|operation| self.transition(operation, frame));
        if let Err(e) = &result {
            tracing::warn!(state = ?self.state, "Copy session failed: {}", e);
            self.writer = None;
            self.state = CopySessionState::Failed;
        }
        result
    }

    fn transition(&mut self, operation: StoreCopyOperation, frame: &CopyFrame) -> Result<()> {
        use CopySessionState as S;
        use StoreCopyOperation as Op;

        match (self.state, operation) {
            (S::ExpectVersion, Op::Version) => {
                let version = parse_u32(frame, "Version")?;
                if version != COPY_PROTOCOL_VERSION {
                    return Err(StoreError::Copy(format!(
                        "unsupported copy protocol version {}",
                        version
                    )));
                }
                self.state = S::ExpectMetadataTable;
            }
            (S::ExpectMetadataTable, Op::MetadataTable) => {
                let table = MetadataManager::decode(frame.payload(), &self.staging_dir)?;
                self.checkpoint_lsn = table.checkpoint_lsn();
                self.source_files = table.files();
                table.begin_close();

                if self.staging_dir.exists() {
                    fs::remove_dir_all(&self.staging_dir)?;
                }
                fs::create_dir_all(&self.staging_dir)?;

                tracing::info!(
                    lsn = self.checkpoint_lsn,
                    files = self.source_files.len(),
                    "Receiving store copy"
                );
                self.state = self.after_file();
            }
            (S::ExpectStartKeyFile, Op::StartKeyFile) => {
                self.check_file_id(frame, "StartKeyFile")?;
                let path = key_file_path(&self.staging_dir, &self.local_file_name());
                self.open(&path)?;
                self.state = S::InKeyFile;
            }
            (S::InKeyFile, Op::WriteKeyFile) | (S::InValueFile, Op::WriteValueFile) => {
                self.write_chunk(frame)?;
            }
            (S::InKeyFile, Op::EndKeyFile) => {
                let recorded = self.source_files[self.file_index].key_file_size();
                self.finish_file(frame, recorded, "EndKeyFile")?;
                self.state = S::ExpectStartValueFile;
            }
            (S::ExpectStartValueFile, Op::StartValueFile) => {
                self.check_file_id(frame, "StartValueFile")?;
                let path = value_file_path(&self.staging_dir, &self.local_file_name());
                self.open(&path)?;
                self.state = S::InValueFile;
            }
            (S::InValueFile, Op::EndValueFile) => {
                let recorded = self.source_files[self.file_index].value_file_size();
                self.finish_file(frame, recorded, "EndValueFile")?;
                self.record_copied_file();
                self.file_index += 1;
                self.state = self.after_file();
            }
            (S::ExpectComplete, Op::Complete) => {
                if !frame.payload().is_empty() {
                    return Err(StoreError::Copy("Complete frame carries a payload".into()));
                }
                tracing::info!(
                    lsn = self.checkpoint_lsn,
                    files = self.copied.len(),
                    "Store copy received"
                );
                self.state = S::Completed;
            }
            (state, operation) => {
                return Err(StoreError::Copy(format!(
                    "unexpected {:?} in state {:?}",
                    operation, state
                )));
            }
        }
        Ok(())
    }

    fn after_file(&self) -> CopySessionState {
        if self.file_index < self.source_files.len() {
            CopySessionState::ExpectStartKeyFile
        } else {
            CopySessionState::ExpectComplete
        }
    }

    fn local_file_id(&self) -> u32 {
        self.first_file_id + self.file_index as u32
    }

    fn local_file_name(&self) -> String {
        checkpoint_file_name(self.local_file_id())
    }

    fn check_file_id(&self, frame: &CopyFrame, what: &str) -> Result<()> {
        let file_id = parse_u32(frame, what)?;
        let expected = self.source_files[self.file_index].file_id();
        if file_id != expected {
            return Err(StoreError::Copy(format!(
                "{} for file {} but file {} is next",
                what, file_id, expected
            )));
        }
        Ok(())
    }

    fn open(&mut self, path: &Path) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        self.writer = Some(BufWriter::new(file));
        self.bytes_written = 0;
        Ok(())
    }

    fn write_chunk(&mut self, frame: &CopyFrame) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| StoreError::Copy("write without an open file".into()))?;
        writer.write_all(frame.payload())?;
        self.bytes_written += frame.payload().len() as u64;
        Ok(())
    }

    fn finish_file(&mut self, frame: &CopyFrame, recorded_size: u64, what: &str) -> Result<()> {
        let total = parse_u64(frame, what)?;
        if total != self.bytes_written || total != recorded_size {
            return Err(StoreError::Copy(format!(
                "{}: sender reports {} bytes, received {}, metadata records {}",
                what, total, self.bytes_written, recorded_size
            )));
        }

        let writer = self
            .writer
            .take()
            .ok_or_else(|| StoreError::Copy(format!("{} without an open file", what)))?;
        let file = writer.into_inner().map_err(|e| StoreError::Io(e.into_error()))?;
        if self.sync {
            file.sync_all()?;
        }
        Ok(())
    }

    fn record_copied_file(&mut self) {
        let source = &self.source_files[self.file_index];
        let metadata = FileMetadata::new(
            &self.staging_dir,
            self.local_file_id(),
            self.local_file_name(),
            source.total_number_of_entries(),
            source.number_of_valid_entries(),
            source.number_of_deleted_entries(),
            source.key_file_size(),
            source.value_file_size(),
        );
        tracing::debug!(
            source_file_id = source.file_id(),
            file_id = metadata.file_id(),
            "Received checkpoint file"
        );
        self.copied.push(CopiedFile {
            source_file_id: source.file_id(),
            metadata,
        });
    }

    /// Hand over the staged generation. Fails unless `Complete` arrived.
    pub fn finish(self) -> Result<CopiedState> {
        if !self.is_completed() {
            return Err(StoreError::CopyAborted);
        }
        Ok(CopiedState {
            checkpoint_lsn: self.checkpoint_lsn,
            staging_dir: self.staging_dir,
            files: self.copied,
        })
    }

    /// Drop everything received so far
    pub fn discard(mut self) -> Result<()> {
        self.writer = None;
        if self.staging_dir.exists() {
            fs::remove_dir_all(&self.staging_dir)?;
        }
        tracing::info!(state = ?self.state, "Discarded incomplete store copy");
        Ok(())
    }
}
