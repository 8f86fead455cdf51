//! Copy operation codes
//!
//! The byte values are part of the wire protocol and never change.

use crate::error::{Result, StoreError};

/// Copy protocol version carried by the `Version` frame
pub const COPY_PROTOCOL_VERSION: u32 = 1;

/// Serialization version carried by the volatile `Metadata` frame
pub const VOLATILE_SERIALIZATION_VERSION: u16 = 1;

/// Persisted store copy states, in protocol order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum StoreCopyOperation {
    Version = 0,
    MetadataTable = 1,
    StartKeyFile = 2,
    WriteKeyFile = 3,
    EndKeyFile = 4,
    StartValueFile = 5,
    WriteValueFile = 6,
    EndValueFile = 7,
    Complete = 8,
}

impl TryFrom<u8> for StoreCopyOperation {
    type Error = StoreError;

    fn try_from(byte: u8) -> Result<Self> {
        Ok(match byte {
            0 => Self::Version,
            1 => Self::MetadataTable,
            2 => Self::StartKeyFile,
            3 => Self::WriteKeyFile,
            4 => Self::EndKeyFile,
            5 => Self::StartValueFile,
            6 => Self::WriteValueFile,
            7 => Self::EndValueFile,
            8 => Self::Complete,
            _ => {
                return Err(StoreError::Copy(format!(
                    "unknown copy operation 0x{:02x}",
                    byte
                )))
            }
        })
    }
}

/// Volatile store copy states, in protocol order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum VolatileStoreCopyOperation {
    Version = 0,
    Metadata = 1,
    Data = 2,
    Complete = 3,
}

impl TryFrom<u8> for VolatileStoreCopyOperation {
    type Error = StoreError;

    fn try_from(byte: u8) -> Result<Self> {
        Ok(match byte {
            0 => Self::Version,
            1 => Self::Metadata,
            2 => Self::Data,
            3 => Self::Complete,
            _ => {
                return Err(StoreError::Copy(format!(
                    "unknown volatile copy operation 0x{:02x}",
                    byte
                )))
            }
        })
    }
}

/// Per-record flags of a volatile `Data` frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VolatileStoreCopyOptionalFlags(u8);

impl VolatileStoreCopyOptionalFlags {
    pub const NONE: Self = Self(0);

    /// A TTL field follows the value
    pub const HAS_TTL: Self = Self(1 << 0);

    pub fn from_bits(bits: u8) -> Result<Self> {
        if bits & !Self::HAS_TTL.0 != 0 {
            return Err(StoreError::Copy(format!("unknown record flags 0x{:02x}", bits)));
        }
        Ok(Self(bits))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}
