//! Persisted copy sender
//!
//! Streams the metadata table and every checkpoint file of one generation.
//! The generation is leased for the whole stream so its files cannot be
//! deleted under it.

use std::fs::File;
use std::io::Read;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Result, StoreError};
use crate::metadata::{FileMetadata, MetadataLease, MetadataManager};

use super::codec::{u32_payload, u64_payload};
use super::{CopyFrame, StoreCopyOperation, COPY_PROTOCOL_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    Version,
    MetadataTable,
    StartKeyFile,
    WriteKeyFile,
    StartValueFile,
    WriteValueFile,
    Complete,
    Done,
}

/// Lazily produced frame sequence for one generation
pub struct StoreCopyStream {
    lease: MetadataLease,
    files: Vec<Arc<FileMetadata>>,
    chunk_size: usize,
    state: SendState,
    file_index: usize,
    reader: Option<File>,
    bytes_sent: u64,
}

impl StoreCopyStream {
    pub fn new(lease: MetadataLease, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "copy chunk size must be positive");
        let files = lease.files();
        Self {
            lease,
            files,
            chunk_size,
            state: SendState::Version,
            file_index: 0,
            reader: None,
            bytes_sent: 0,
        }
    }

    /// Checkpoint LSN of the generation being sent
    pub fn checkpoint_lsn(&self) -> i64 {
        self.lease.checkpoint_lsn()
    }

    pub fn is_finished(&self) -> bool {
        self.state == SendState::Done
    }

    /// Next frame, or `None` after `Complete` has been produced
    pub fn next_frame(&mut self) -> Result<Option<CopyFrame>> {
        let frame = match self.state {
            SendState::Version => {
                tracing::info!(
                    lsn = self.lease.checkpoint_lsn(),
                    files = self.files.len(),
                    "Starting store copy"
                );
                self.state = SendState::MetadataTable;
                CopyFrame::persisted(
                    StoreCopyOperation::Version,
                    u32_payload(COPY_PROTOCOL_VERSION),
                )
            }
            SendState::MetadataTable => {
                self.state = self.after_file();
                CopyFrame::persisted(
                    StoreCopyOperation::MetadataTable,
                    MetadataManager::encode(&self.lease),
                )
            }
            SendState::StartKeyFile => {
                let path = self.files[self.file_index].key_file_path();
                self.open(File::open(&path)?);
                self.state = SendState::WriteKeyFile;
                CopyFrame::persisted(
                    StoreCopyOperation::StartKeyFile,
                    u32_payload(self.current_file().file_id()),
                )
            }
            SendState::WriteKeyFile => match self.read_chunk()? {
                Some(chunk) => CopyFrame::persisted(StoreCopyOperation::WriteKeyFile, chunk),
                None => {
                    let total = self.finish_file(self.current_file().key_file_size())?;
                    self.state = SendState::StartValueFile;
                    CopyFrame::persisted(StoreCopyOperation::EndKeyFile, u64_payload(total))
                }
            },
            SendState::StartValueFile => {
                let path = self.files[self.file_index].value_file_path();
                self.open(File::open(&path)?);
                self.state = SendState::WriteValueFile;
                CopyFrame::persisted(
                    StoreCopyOperation::StartValueFile,
                    u32_payload(self.current_file().file_id()),
                )
            }
            SendState::WriteValueFile => match self.read_chunk()? {
                Some(chunk) => CopyFrame::persisted(StoreCopyOperation::WriteValueFile, chunk),
                None => {
                    let total = self.finish_file(self.current_file().value_file_size())?;
                    tracing::debug!(
                        file_id = self.current_file().file_id(),
                        "Sent checkpoint file"
                    );
                    self.file_index += 1;
                    self.state = self.after_file();
                    CopyFrame::persisted(StoreCopyOperation::EndValueFile, u64_payload(total))
                }
            },
            SendState::Complete => {
                tracing::info!(lsn = self.lease.checkpoint_lsn(), "Store copy complete");
                self.state = SendState::Done;
                CopyFrame::persisted(StoreCopyOperation::Complete, Bytes::new())
            }
            SendState::Done => return Ok(None),
        };
        Ok(Some(frame))
    }

    fn current_file(&self) -> &Arc<FileMetadata> {
        &self.files[self.file_index]
    }

    fn after_file(&self) -> SendState {
        if self.file_index < self.files.len() {
            SendState::StartKeyFile
        } else {
            SendState::Complete
        }
    }

    fn open(&mut self, file: File) {
        self.reader = Some(file);
        self.bytes_sent = 0;
    }

    fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Ok(None),
        };

        let mut chunk = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < chunk.len() {
            let n = reader.read(&mut chunk[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        chunk.truncate(filled);
        self.bytes_sent += filled as u64;
        Ok(Some(Bytes::from(chunk)))
    }

    /// Close the current file and check it matched its recorded size
    fn finish_file(&mut self, recorded_size: u64) -> Result<u64> {
        self.reader = None;
        if self.bytes_sent != recorded_size {
            return Err(StoreError::Corruption(format!(
                "checkpoint file {} is {} bytes but metadata records {}",
                self.current_file().file_name(),
                self.bytes_sent,
                recorded_size
            )));
        }
        Ok(self.bytes_sent)
    }
}

impl Iterator for StoreCopyStream {
    type Item = Result<CopyFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}
