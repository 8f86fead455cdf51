//! Key file builder and reader
//!
//! Writes sorted key records with versioning metadata and value offsets, and
//! reads them back with full CRC validation.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::item::{self, ItemValue, RecordKind, StoreKey, ValueLocation, VersionedItem};

use super::{
    encode_footer, encode_header, read_i64, read_u32, read_u64, validate_file, FLAG_HAS_TTL,
    HEADER_SIZE, KEY_FILE_MAGIC, KEY_RECORD_FIXED_SIZE,
};

/// Per-key metadata stored in the key file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRecord {
    pub kind: RecordKind,
    pub version_sequence_number: i64,
    /// `OPEN_SEQUENCE_NUMBER` when the version was current at checkpoint time
    pub end_sequence_number: i64,
    pub ttl: Option<u64>,
    pub value_offset: u64,
    pub value_size: u32,
}

impl KeyRecord {
    /// Materialize as a versioned item whose value lives in `file_id`'s value file
    pub fn to_item<V>(&self, file_id: u32) -> VersionedItem<V> {
        let value = match self.kind {
            RecordKind::Deleted => ItemValue::Absent,
            _ => ItemValue::Disk(ValueLocation {
                file_id,
                offset: self.value_offset,
                size: self.value_size,
            }),
        };
        VersionedItem::from_parts(
            self.kind,
            value,
            self.version_sequence_number,
            self.end_sequence_number,
            self.ttl,
        )
    }
}

/// Builder for a key file. Records must be added in key order.
pub struct KeyFileBuilder {
    path: PathBuf,
    writer: BufWriter<File>,
    entry_count: u64,
    current_offset: u64,
    data_hasher: crc32fast::Hasher,
    sync: bool,
}

impl KeyFileBuilder {
    /// Create the file and write the header (count patched in `finish`)
    pub fn new(path: &Path, sync: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);
        writer.write_all(&encode_header(KEY_FILE_MAGIC, 0))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            entry_count: 0,
            current_offset: HEADER_SIZE,
            data_hasher: crc32fast::Hasher::new(),
            sync,
        })
    }

    /// Append one record
    pub fn add(&mut self, key: &[u8], record: &KeyRecord) -> Result<()> {
        let mut buf = Vec::with_capacity(KEY_RECORD_FIXED_SIZE + 8 + key.len());
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.push(record.kind as u8);
        buf.push(if record.ttl.is_some() { FLAG_HAS_TTL } else { 0 });
        buf.extend_from_slice(&record.version_sequence_number.to_le_bytes());
        buf.extend_from_slice(&record.end_sequence_number.to_le_bytes());
        buf.extend_from_slice(&record.value_offset.to_le_bytes());
        buf.extend_from_slice(&record.value_size.to_le_bytes());
        if let Some(ttl) = record.ttl {
            buf.extend_from_slice(&ttl.to_le_bytes());
        }
        buf.extend_from_slice(key);

        self.writer.write_all(&buf)?;
        self.data_hasher.update(&buf);
        self.current_offset += buf.len() as u64;
        self.entry_count += 1;
        Ok(())
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Write the footer, patch the header count, and return (count, file size)
    pub fn finish(mut self) -> Result<(u64, u64)> {
        let crc = self.data_hasher.finalize();
        self.writer.write_all(&encode_footer(self.current_offset, crc))?;
        self.writer.flush()?;

        let mut file = self.writer.into_inner().map_err(|e| {
            tracing::warn!("Failed to flush key file {}", self.path.display());
            StoreError::Io(e.into_error())
        })?;
        file.seek(SeekFrom::Start(6))?; // After magic + version
        file.write_all(&self.entry_count.to_le_bytes())?;
        if self.sync {
            file.sync_all()?;
        }

        let file_size = file.metadata()?.len();
        Ok((self.entry_count, file_size))
    }
}

/// Parsed key file: raw key bytes with their records, in file order
#[derive(Debug)]
pub struct KeyFileReader {
    path: PathBuf,
    records: Vec<(Vec<u8>, KeyRecord)>,
    file_size: u64,
}

impl KeyFileReader {
    /// Read and validate a key file.
    ///
    /// `expected_size` is the size the metadata table recorded for it.
    pub fn open(path: &Path, expected_size: Option<u64>) -> Result<Self> {
        let bytes = fs::read(path)?;
        let file_size = bytes.len() as u64;
        if let Some(expected) = expected_size {
            if expected != file_size {
                return Err(StoreError::Corruption(format!(
                    "{}: size {} does not match recorded size {}",
                    path.display(),
                    file_size,
                    expected
                )));
            }
        }

        let (count, data) = validate_file(&bytes, KEY_FILE_MAGIC, path)?;
        let records = Self::parse_records(data, path)?;
        if records.len() as u64 != count {
            return Err(StoreError::Corruption(format!(
                "{}: header count {} but {} records",
                path.display(),
                count,
                records.len()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            records,
            file_size,
        })
    }

    fn parse_records(data: &[u8], path: &Path) -> Result<Vec<(Vec<u8>, KeyRecord)>> {
        let truncated = || StoreError::Corruption(format!("{}: truncated key record", path.display()));

        let mut records = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            if pos + KEY_RECORD_FIXED_SIZE > data.len() {
                return Err(truncated());
            }
            let key_len = read_u32(data, pos) as usize;
            let kind = RecordKind::from_u8(data[pos + 4]).ok_or_else(|| {
                StoreError::Corruption(format!(
                    "{}: unknown record kind {}",
                    path.display(),
                    data[pos + 4]
                ))
            })?;
            let flags = data[pos + 5];
            let version_sequence_number = read_i64(data, pos + 6);
            let end_sequence_number = read_i64(data, pos + 14);
            let value_offset = read_u64(data, pos + 22);
            let value_size = read_u32(data, pos + 30);
            pos += KEY_RECORD_FIXED_SIZE;

            let ttl = if flags & FLAG_HAS_TTL != 0 {
                if pos + 8 > data.len() {
                    return Err(truncated());
                }
                let ttl = read_u64(data, pos);
                pos += 8;
                Some(ttl)
            } else {
                None
            };

            if pos + key_len > data.len() {
                return Err(truncated());
            }
            let key = data[pos..pos + key_len].to_vec();
            pos += key_len;

            if end_sequence_number < version_sequence_number {
                return Err(StoreError::Corruption(format!(
                    "{}: record end {} precedes begin {}",
                    path.display(),
                    end_sequence_number,
                    version_sequence_number
                )));
            }

            records.push((
                key,
                KeyRecord {
                    kind,
                    version_sequence_number,
                    end_sequence_number,
                    ttl,
                    value_offset,
                    value_size,
                },
            ));
        }
        Ok(records)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn entry_count(&self) -> u64 {
        self.records.len() as u64
    }

    /// Raw records (type agnostic, used by tooling)
    pub fn records(&self) -> &[(Vec<u8>, KeyRecord)] {
        &self.records
    }

    /// Decode keys and build versioned items, checking the key order
    pub fn into_items<K: StoreKey, V>(self, file_id: u32) -> Result<Vec<(K, Arc<VersionedItem<V>>)>> {
        let mut items: Vec<(K, Arc<VersionedItem<V>>)> = Vec::with_capacity(self.records.len());
        for (key_bytes, record) in &self.records {
            let key: K = item::decode(key_bytes)?;
            if let Some((previous, _)) = items.last() {
                if previous >= &key {
                    return Err(StoreError::Corruption(format!(
                        "{}: keys out of order at {:?}",
                        self.path.display(),
                        key
                    )));
                }
            }
            items.push((key, Arc::new(record.to_item(file_id))));
        }
        Ok(items)
    }
}
