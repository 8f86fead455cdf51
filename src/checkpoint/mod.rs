//! Checkpoint Module
//!
//! Immutable on-disk snapshot of store state at a checkpoint LSN. Every
//! checkpoint file is a key file / value file pair sharing a file id.
//!
//! ## Key File Format (`.sfk`)
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                                │
//! │   Magic: "TSKF" (4) | Version: u16 (2) | Count: u64 (8)          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ Records (sorted by key, one per key)                             │
//! │   [KeyLen: u32][Kind: u8][Flags: u8][Begin: i64][End: i64]       │
//! │   [ValueOffset: u64][ValueSize: u32][Ttl: u64 if Flags&1][Key]   │
//! │   (Kind = Deleted: ValueOffset/ValueSize are 0)                  │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ Footer (16 bytes)                                                │
//! │   DataEnd: u64 (8) | DataCRC: u32 (4) | Padding (4)              │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Value File Format (`.sfv`)
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                                │
//! │   Magic: "TSVF" (4) | Version: u16 (2) | Count: u64 (8)          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ Values (raw serialized bytes, addressed by absolute offset)      │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ Footer (16 bytes)                                                │
//! │   DataEnd: u64 (8) | DataCRC: u32 (4) | Padding (4)              │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. The CRC covers the bytes between header
//! and footer. Readers cross-check the file length against the size the
//! metadata table recorded for it.

mod file;
mod key_file;
mod value_file;
mod writer;

use std::path::{Path, PathBuf};

pub use file::CheckpointFile;
pub use key_file::{KeyFileBuilder, KeyFileReader, KeyRecord};
pub use value_file::{ValueFileBuilder, ValueFileReader};
pub use writer::CheckpointWriter;

use crate::error::{Result, StoreError};

// =============================================================================
// Shared Constants (used by builders and readers)
// =============================================================================

/// Magic bytes identifying a key file
pub(crate) const KEY_FILE_MAGIC: &[u8; 4] = b"TSKF";

/// Magic bytes identifying a value file
pub(crate) const VALUE_FILE_MAGIC: &[u8; 4] = b"TSVF";

/// Current checkpoint file format version
pub(crate) const FORMAT_VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + Count (8) = 14 bytes
pub(crate) const HEADER_SIZE: u64 = 14;

/// Footer size: DataEnd (8) + DataCRC (4) + Padding (4) = 16 bytes
pub(crate) const FOOTER_SIZE: u64 = 16;

/// Fixed part of a key record (everything but the optional TTL and the key)
pub(crate) const KEY_RECORD_FIXED_SIZE: usize = 4 + 1 + 1 + 8 + 8 + 8 + 4;

/// Record flag: a TTL field follows the fixed part
pub(crate) const FLAG_HAS_TTL: u8 = 0x01;

/// Key file extension
pub const KEY_FILE_EXTENSION: &str = "sfk";

/// Value file extension
pub const VALUE_FILE_EXTENSION: &str = "sfv";

/// File name (without extension) for a checkpoint file id
pub fn checkpoint_file_name(file_id: u32) -> String {
    format!("checkpoint_{:06}", file_id)
}

/// Parse a file id back out of a key/value file path.
/// "checkpoint_000042.sfk" → Some(42)
pub fn parse_checkpoint_file_id(path: &Path) -> Option<u32> {
    let ext = path.extension()?.to_str()?;
    if ext != KEY_FILE_EXTENSION && ext != VALUE_FILE_EXTENSION {
        return None;
    }
    let name = path.file_stem()?.to_string_lossy();
    name.strip_prefix("checkpoint_")?.parse().ok()
}

pub fn key_file_path(dir: &Path, file_name: &str) -> PathBuf {
    dir.join(format!("{}.{}", file_name, KEY_FILE_EXTENSION))
}

pub fn value_file_path(dir: &Path, file_name: &str) -> PathBuf {
    dir.join(format!("{}.{}", file_name, VALUE_FILE_EXTENSION))
}

// =============================================================================
// Header / Footer helpers
// =============================================================================

pub(crate) fn encode_header(magic: &[u8; 4], count: u64) -> [u8; HEADER_SIZE as usize] {
    let mut header = [0u8; HEADER_SIZE as usize];
    header[0..4].copy_from_slice(magic);
    header[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    header[6..14].copy_from_slice(&count.to_le_bytes());
    header
}

pub(crate) fn encode_footer(data_end: u64, crc: u32) -> [u8; FOOTER_SIZE as usize] {
    let mut footer = [0u8; FOOTER_SIZE as usize];
    footer[0..8].copy_from_slice(&data_end.to_le_bytes());
    footer[8..12].copy_from_slice(&crc.to_le_bytes());
    footer
}

/// Validate framing of a whole file image and return (count, data region)
pub(crate) fn validate_file<'a>(
    bytes: &'a [u8],
    magic: &[u8; 4],
    path: &Path,
) -> Result<(u64, &'a [u8])> {
    let len = bytes.len() as u64;
    if len < HEADER_SIZE + FOOTER_SIZE {
        return Err(StoreError::Corruption(format!(
            "{}: file too short ({} bytes)",
            path.display(),
            len
        )));
    }

    if &bytes[0..4] != magic {
        return Err(StoreError::Corruption(format!(
            "{}: invalid magic {:?}",
            path.display(),
            &bytes[0..4]
        )));
    }

    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != FORMAT_VERSION {
        return Err(StoreError::Corruption(format!(
            "{}: unsupported format version {}",
            path.display(),
            version
        )));
    }

    let count = read_u64(bytes, 6);
    let footer_start = (len - FOOTER_SIZE) as usize;
    let data_end = read_u64(bytes, footer_start);
    if data_end != len - FOOTER_SIZE {
        return Err(StoreError::Corruption(format!(
            "{}: footer data end {} does not match file length {}",
            path.display(),
            data_end,
            len
        )));
    }

    let stored_crc = read_u32(bytes, footer_start + 8);
    let data = &bytes[HEADER_SIZE as usize..footer_start];
    let actual_crc = crc32fast::hash(data);
    if stored_crc != actual_crc {
        return Err(StoreError::Corruption(format!(
            "{}: CRC mismatch (stored {:08x}, computed {:08x})",
            path.display(),
            stored_crc,
            actual_crc
        )));
    }

    Ok((count, data))
}

pub(crate) fn read_u32(bytes: &[u8], pos: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[pos..pos + 4]);
    u32::from_le_bytes(buf)
}

pub(crate) fn read_u64(bytes: &[u8], pos: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[pos..pos + 8]);
    u64::from_le_bytes(buf)
}

pub(crate) fn read_i64(bytes: &[u8], pos: usize) -> i64 {
    read_u64(bytes, pos) as i64
}
