//! Metadata file persistence
//!
//! ## Metadata File Format (`.sfm`)
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Header (18 bytes)                                                │
//! │   Magic: "TSMT" (4) | Version: u16 (2) | FileCount: u32 (4)      │
//! │   CheckpointLSN: i64 (8)                                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ File entries (ordered by file id)                                │
//! │   [FileId: u32][NameLen: u16][Name]                              │
//! │   [Total: u64][Valid: u64][Deleted: u64]                         │
//! │   [KeyFileSize: u64][ValueFileSize: u64]                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ Footer: CRC32 of everything above (4)                            │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Safe replace
//! ```text
//! write temp ──► current → backup ──► temp → current ──► delete backup
//! ```
//! A crash between the two renames leaves only the backup, which recovery
//! restores.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, StoreError};

use super::{FileMetadata, MetadataTable};

/// Live generation
pub const CURRENT_METADATA_FILE_NAME: &str = "current_metadata.sfm";

/// Next generation while a checkpoint is in flight
pub const TEMP_METADATA_FILE_NAME: &str = "temp_metadata.sfm";

/// Previous generation during a replace
pub const BACKUP_METADATA_FILE_NAME: &str = "backup_metadata.sfm";

const METADATA_MAGIC: &[u8; 4] = b"TSMT";
const METADATA_VERSION: u16 = 1;
const METADATA_HEADER_SIZE: usize = 18;
const METADATA_FOOTER_SIZE: usize = 4;
const FILE_ENTRY_FIXED_SIZE: usize = 4 + 2 + 8 * 5;

/// Reads and writes metadata files for one work folder
pub struct MetadataManager;

impl MetadataManager {
    pub fn current_path(dir: &Path) -> PathBuf {
        dir.join(CURRENT_METADATA_FILE_NAME)
    }

    pub fn temp_path(dir: &Path) -> PathBuf {
        dir.join(TEMP_METADATA_FILE_NAME)
    }

    pub fn backup_path(dir: &Path) -> PathBuf {
        dir.join(BACKUP_METADATA_FILE_NAME)
    }

    /// Serialize a table into the metadata file image
    pub fn encode(table: &MetadataTable) -> Vec<u8> {
        let files = table.files();
        let mut buf = Vec::with_capacity(METADATA_HEADER_SIZE + files.len() * 64);
        buf.extend_from_slice(METADATA_MAGIC);
        buf.extend_from_slice(&METADATA_VERSION.to_le_bytes());
        buf.extend_from_slice(&(files.len() as u32).to_le_bytes());
        buf.extend_from_slice(&table.checkpoint_lsn().to_le_bytes());

        for file in &files {
            let name = file.file_name().as_bytes();
            buf.extend_from_slice(&file.file_id().to_le_bytes());
            buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
            buf.extend_from_slice(name);
            buf.extend_from_slice(&file.total_number_of_entries().to_le_bytes());
            buf.extend_from_slice(&file.number_of_valid_entries().to_le_bytes());
            buf.extend_from_slice(&file.number_of_deleted_entries().to_le_bytes());
            buf.extend_from_slice(&file.key_file_size().to_le_bytes());
            buf.extend_from_slice(&file.value_file_size().to_le_bytes());
        }

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Parse a metadata file image. Files are located in `dir`.
    pub fn decode(bytes: &[u8], dir: &Path) -> Result<Arc<MetadataTable>> {
        if bytes.len() < METADATA_HEADER_SIZE + METADATA_FOOTER_SIZE {
            return Err(StoreError::Corruption(format!(
                "metadata file too short ({} bytes)",
                bytes.len()
            )));
        }

        let body_end = bytes.len() - METADATA_FOOTER_SIZE;
        let stored_crc = u32::from_le_bytes(read_array(bytes, body_end)?);
        let actual_crc = crc32fast::hash(&bytes[..body_end]);
        if stored_crc != actual_crc {
            return Err(StoreError::Corruption(format!(
                "metadata CRC mismatch (stored {:08x}, computed {:08x})",
                stored_crc, actual_crc
            )));
        }

        if &bytes[0..4] != METADATA_MAGIC {
            return Err(StoreError::Corruption(format!(
                "invalid metadata magic {:?}",
                &bytes[0..4]
            )));
        }
        let version = u16::from_le_bytes(read_array(bytes, 4)?);
        if version != METADATA_VERSION {
            return Err(StoreError::Corruption(format!(
                "unsupported metadata version {}",
                version
            )));
        }
        let file_count = u32::from_le_bytes(read_array(bytes, 6)?);
        let checkpoint_lsn = i64::from_le_bytes(read_array(bytes, 10)?);

        let table = MetadataTable::with_checkpoint_lsn(checkpoint_lsn);
        let body = &bytes[..body_end];
        let mut pos = METADATA_HEADER_SIZE;
        for _ in 0..file_count {
            if pos + FILE_ENTRY_FIXED_SIZE > body.len() {
                return Err(StoreError::Corruption("truncated metadata file entry".into()));
            }
            let file_id = u32::from_le_bytes(read_array(body, pos)?);
            let name_len = u16::from_le_bytes(read_array(body, pos + 4)?) as usize;
            pos += 6;
            if pos + name_len + 40 > body.len() {
                return Err(StoreError::Corruption("truncated metadata file entry".into()));
            }
            let file_name = std::str::from_utf8(&body[pos..pos + name_len])
                .map_err(|e| StoreError::Corruption(format!("metadata file name: {}", e)))?
                .to_string();
            pos += name_len;

            let mut fields = [0u64; 5];
            for field in fields.iter_mut() {
                *field = u64::from_le_bytes(read_array(body, pos)?);
                pos += 8;
            }
            let [total, valid, deleted, key_size, value_size] = fields;

            if table.contains_file(file_id) {
                return Err(StoreError::Corruption(format!(
                    "duplicate file id {} in metadata file",
                    file_id
                )));
            }
            table.add_file(Arc::new(FileMetadata::new(
                dir, file_id, file_name, total, valid, deleted, key_size, value_size,
            )));
        }

        if pos != body.len() {
            return Err(StoreError::Corruption(format!(
                "{} trailing bytes in metadata file",
                body.len() - pos
            )));
        }

        table.set_metadata_file_size(bytes.len() as u64);
        Ok(table)
    }

    /// Write `table` to `path`, recording the resulting size on the table
    pub fn write(table: &MetadataTable, path: &Path, sync: bool) -> Result<u64> {
        let bytes = Self::encode(table);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&bytes)?;
        if sync {
            file.sync_all()?;
        }

        let size = bytes.len() as u64;
        table.set_metadata_file_size(size);
        Ok(size)
    }

    /// Read a metadata file and check its size against what was read
    pub fn open(path: &Path, dir: &Path) -> Result<Arc<MetadataTable>> {
        let bytes = fs::read(path)?;
        Self::decode(&bytes, dir).map_err(|e| match e {
            StoreError::Corruption(msg) => {
                StoreError::Corruption(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Replace `current` with `temp`, keeping `backup` until the swap is done
    pub fn safe_file_replace(current: &Path, temp: &Path, backup: &Path) -> Result<()> {
        remove_if_exists(backup)?;
        if current.exists() {
            fs::rename(current, backup)?;
        }
        fs::rename(temp, current)?;
        remove_if_exists(backup)?;
        Ok(())
    }

    /// Bring the metadata files of `dir` back to a consistent state after a
    /// crash. Returns the current metadata path if a generation exists.
    pub fn recover_files(dir: &Path) -> Result<Option<PathBuf>> {
        let current = Self::current_path(dir);
        let temp = Self::temp_path(dir);
        let backup = Self::backup_path(dir);

        if !current.exists() && backup.exists() {
            tracing::warn!(
                "Restoring {} after an interrupted metadata replace",
                backup.display()
            );
            fs::rename(&backup, &current)?;
        }

        if temp.exists() {
            tracing::info!("Discarding unfinished checkpoint metadata {}", temp.display());
            remove_if_exists(&temp)?;
        }
        remove_if_exists(&backup)?;

        Ok(current.exists().then_some(current))
    }
}

fn read_array<const N: usize>(bytes: &[u8], pos: usize) -> Result<[u8; N]> {
    bytes
        .get(pos..pos + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| StoreError::Corruption("truncated metadata file".into()))
}

pub(crate) fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
