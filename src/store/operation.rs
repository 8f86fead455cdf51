//! Replicated operation vocabulary
//!
//! ## Record Format
//! ```text
//! ┌────────────────┬──────────────┬──────────────────┬───────────┐
//! │ SerVersion (1) │ Operation (1)│ MetadataType (1) │ Flags (1) │
//! ├────────────────┴──────────────┴──────────────────┴───────────┤
//! │ Key:   [KeyLen: u32][Key]        (Key, KeyAndValue)
//! │ Value: [ValueLen: u32][Value]    (KeyAndValue)
//! │ Ttl:   [Ttl: u64]                (Flags & HAS_TTL)
//! └──────────────────────────────────────────────────────────────┘
//! ```
//! Keys and values are bincode-serialized; integers are little-endian.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Result, StoreError};
use crate::item;

/// Current record serialization version
pub const OPERATION_RECORD_VERSION: u8 = 1;

/// Header size: version, operation, metadata type, flags
pub const OPERATION_RECORD_HEADER_SIZE: usize = 4;

/// Flags bit: a time-to-live follows the key and value
pub const OPERATION_FLAG_HAS_TTL: u8 = 0x01;

/// Operations the replication layer logs and replays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StoreOperation {
    Add = 0,
    Remove = 1,
    Update = 2,
    PartialUpdate = 3,
    Get = 4,
    Clear = 5,
    Checkpoint = 6,
    Copy = 7,
    Pause = 8,
}

impl TryFrom<u8> for StoreOperation {
    type Error = StoreError;

    fn try_from(byte: u8) -> Result<Self> {
        Ok(match byte {
            0 => Self::Add,
            1 => Self::Remove,
            2 => Self::Update,
            3 => Self::PartialUpdate,
            4 => Self::Get,
            5 => Self::Clear,
            6 => Self::Checkpoint,
            7 => Self::Copy,
            8 => Self::Pause,
            _ => {
                return Err(StoreError::Corruption(format!(
                    "unknown store operation {}",
                    byte
                )))
            }
        })
    }
}

/// What a logged record carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MetadataOperationType {
    Unknown = 0,
    Key = 1,
    KeyAndValue = 2,
}

impl TryFrom<u8> for MetadataOperationType {
    type Error = StoreError;

    fn try_from(byte: u8) -> Result<Self> {
        Ok(match byte {
            0 => Self::Unknown,
            1 => Self::Key,
            2 => Self::KeyAndValue,
            _ => {
                return Err(StoreError::Corruption(format!(
                    "unknown metadata operation type {}",
                    byte
                )))
            }
        })
    }
}

/// A logged store operation with its serialized key and value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
    operation: StoreOperation,
    metadata_type: MetadataOperationType,
    key: Option<Vec<u8>>,
    value: Option<Vec<u8>>,
    ttl: Option<u64>,
}

impl OperationRecord {
    pub fn add<K: Serialize, V: Serialize>(key: &K, value: &V) -> Result<Self> {
        Self::key_and_value(StoreOperation::Add, key, value)
    }

    pub fn update<K: Serialize, V: Serialize>(key: &K, value: &V) -> Result<Self> {
        Self::key_and_value(StoreOperation::Update, key, value)
    }

    pub fn partial_update<K: Serialize, V: Serialize>(key: &K, value: &V) -> Result<Self> {
        Self::key_and_value(StoreOperation::PartialUpdate, key, value)
    }

    pub fn remove<K: Serialize>(key: &K) -> Result<Self> {
        Ok(Self {
            operation: StoreOperation::Remove,
            metadata_type: MetadataOperationType::Key,
            key: Some(item::encode(key)?),
            value: None,
            ttl: None,
        })
    }

    pub fn clear() -> Self {
        Self::without_payload(StoreOperation::Clear)
    }

    /// Record carrying no key or value (Clear, Checkpoint, Copy, Pause)
    pub fn without_payload(operation: StoreOperation) -> Self {
        Self {
            operation,
            metadata_type: MetadataOperationType::Unknown,
            key: None,
            value: None,
            ttl: None,
        }
    }

    fn key_and_value<K: Serialize, V: Serialize>(
        operation: StoreOperation,
        key: &K,
        value: &V,
    ) -> Result<Self> {
        Ok(Self {
            operation,
            metadata_type: MetadataOperationType::KeyAndValue,
            key: Some(item::encode(key)?),
            value: Some(item::encode(value)?),
            ttl: None,
        })
    }

    /// Attach the time-to-live (milliseconds) the written item carries
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        assert_eq!(
            self.metadata_type,
            MetadataOperationType::KeyAndValue,
            "only records carrying a value can carry a ttl"
        );
        self.ttl = Some(ttl);
        self
    }

    pub fn operation(&self) -> StoreOperation {
        self.operation
    }

    pub fn metadata_type(&self) -> MetadataOperationType {
        self.metadata_type
    }

    /// Decode the key, if the record carries one
    pub fn key<K: DeserializeOwned>(&self) -> Result<Option<K>> {
        self.key.as_deref().map(item::decode).transpose()
    }

    /// Decode the value, if the record carries one
    pub fn value<V: DeserializeOwned>(&self) -> Result<Option<V>> {
        self.value.as_deref().map(item::decode).transpose()
    }

    pub fn ttl(&self) -> Option<u64> {
        self.ttl
    }

    pub fn encode(&self) -> Vec<u8> {
        let key_len = self.key.as_ref().map_or(0, |k| 4 + k.len());
        let value_len = self.value.as_ref().map_or(0, |v| 4 + v.len());
        let ttl_len = if self.ttl.is_some() { 8 } else { 0 };
        let mut buf =
            Vec::with_capacity(OPERATION_RECORD_HEADER_SIZE + key_len + value_len + ttl_len);
        buf.push(OPERATION_RECORD_VERSION);
        buf.push(self.operation as u8);
        buf.push(self.metadata_type as u8);
        buf.push(if self.ttl.is_some() { OPERATION_FLAG_HAS_TTL } else { 0 });
        for part in [&self.key, &self.value].into_iter().flatten() {
            buf.extend_from_slice(&(part.len() as u32).to_le_bytes());
            buf.extend_from_slice(part);
        }
        if let Some(ttl) = self.ttl {
            buf.extend_from_slice(&ttl.to_le_bytes());
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < OPERATION_RECORD_HEADER_SIZE {
            return Err(StoreError::Corruption(format!(
                "operation record too short ({} bytes)",
                bytes.len()
            )));
        }
        if bytes[0] != OPERATION_RECORD_VERSION {
            return Err(StoreError::Corruption(format!(
                "unsupported operation record version {}",
                bytes[0]
            )));
        }
        let operation = StoreOperation::try_from(bytes[1])?;
        let metadata_type = MetadataOperationType::try_from(bytes[2])?;
        let flags = bytes[3];
        if flags & !OPERATION_FLAG_HAS_TTL != 0 {
            return Err(StoreError::Corruption(format!(
                "unknown operation record flags {:#04x}",
                flags
            )));
        }
        let has_ttl = flags & OPERATION_FLAG_HAS_TTL != 0;
        if has_ttl && metadata_type != MetadataOperationType::KeyAndValue {
            return Err(StoreError::Corruption(format!(
                "{:?} record carries a ttl",
                metadata_type
            )));
        }

        let mut pos = OPERATION_RECORD_HEADER_SIZE;
        let mut next_part = || -> Result<Vec<u8>> {
            let len_bytes = bytes
                .get(pos..pos + 4)
                .ok_or_else(|| StoreError::Corruption("truncated operation record".into()))?;
            let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
                as usize;
            let part = bytes
                .get(pos + 4..pos + 4 + len)
                .ok_or_else(|| StoreError::Corruption("truncated operation record".into()))?;
            pos += 4 + len;
            Ok(part.to_vec())
        };

        let (key, value) = match metadata_type {
            MetadataOperationType::Unknown => (None, None),
            MetadataOperationType::Key => (Some(next_part()?), None),
            MetadataOperationType::KeyAndValue => (Some(next_part()?), Some(next_part()?)),
        };

        let ttl = if has_ttl {
            let ttl_bytes = bytes
                .get(pos..pos + 8)
                .ok_or_else(|| StoreError::Corruption("truncated operation record".into()))?;
            pos += 8;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(ttl_bytes);
            Some(u64::from_le_bytes(buf))
        } else {
            None
        };

        if pos != bytes.len() {
            return Err(StoreError::Corruption(format!(
                "{} trailing bytes in operation record",
                bytes.len() - pos
            )));
        }

        Ok(Self {
            operation,
            metadata_type,
            key,
            value,
            ttl,
        })
    }
}
