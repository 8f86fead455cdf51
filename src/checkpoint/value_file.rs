//! Value file builder and reader
//!
//! Raw serialized values addressed by absolute offset from the key file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{Result, StoreError};
use crate::item::ValueLocation;

use super::{encode_footer, encode_header, validate_file, FOOTER_SIZE, HEADER_SIZE, VALUE_FILE_MAGIC};

/// Builder for a value file
pub struct ValueFileBuilder {
    path: PathBuf,
    writer: BufWriter<File>,
    value_count: u64,
    current_offset: u64,
    data_hasher: crc32fast::Hasher,
    sync: bool,
}

impl ValueFileBuilder {
    pub fn new(path: &Path, sync: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);
        writer.write_all(&encode_header(VALUE_FILE_MAGIC, 0))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            value_count: 0,
            current_offset: HEADER_SIZE,
            data_hasher: crc32fast::Hasher::new(),
            sync,
        })
    }

    /// Append one serialized value, returning (offset, size)
    pub fn append(&mut self, bytes: &[u8]) -> Result<(u64, u32)> {
        let size = u32::try_from(bytes.len()).map_err(|_| {
            StoreError::Serialization(format!("value of {} bytes exceeds u32", bytes.len()))
        })?;
        let offset = self.current_offset;
        self.writer.write_all(bytes)?;
        self.data_hasher.update(bytes);
        self.current_offset += bytes.len() as u64;
        self.value_count += 1;
        Ok((offset, size))
    }

    /// Write the footer, patch the header count, and return (count, file size)
    pub fn finish(mut self) -> Result<(u64, u64)> {
        let crc = self.data_hasher.finalize();
        self.writer.write_all(&encode_footer(self.current_offset, crc))?;
        self.writer.flush()?;

        let mut file = self.writer.into_inner().map_err(|e| {
            tracing::warn!("Failed to flush value file {}", self.path.display());
            StoreError::Io(e.into_error())
        })?;
        file.seek(SeekFrom::Start(6))?;
        file.write_all(&self.value_count.to_le_bytes())?;
        if self.sync {
            file.sync_all()?;
        }

        let file_size = file.metadata()?.len();
        Ok((self.value_count, file_size))
    }
}

/// Reader for a value file with positioned reads
///
/// The file handle sits behind a mutex so concurrent readers can share it;
/// each read is a seek + read_exact under the lock.
pub struct ValueFileReader {
    path: PathBuf,
    file: Mutex<File>,
    value_count: u64,
    data_end: u64,
    file_size: u64,
}

impl ValueFileReader {
    /// Open and validate a value file (header, footer, CRC, recorded size)
    pub fn open(path: &Path, expected_size: Option<u64>) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
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

        let mut bytes = Vec::with_capacity(file_size as usize);
        file.read_to_end(&mut bytes)?;
        let (value_count, _) = validate_file(&bytes, VALUE_FILE_MAGIC, path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            value_count,
            data_end: file_size - FOOTER_SIZE,
            file_size,
        })
    }

    /// Read the raw bytes of one value
    pub fn read(&self, location: &ValueLocation) -> Result<Vec<u8>> {
        let end = location.offset + location.size as u64;
        if location.offset < HEADER_SIZE || end > self.data_end {
            return Err(StoreError::Corruption(format!(
                "{}: value range {}..{} outside data region",
                self.path.display(),
                location.offset,
                end
            )));
        }

        let mut buf = vec![0u8; location.size as usize];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(location.offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn value_count(&self) -> u64 {
        self.value_count
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }
}
