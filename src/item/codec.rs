//! Key/value serialization
//!
//! bincode with the default (little-endian, fixed-int) options. The encoding
//! must stay stable across processes since it lands in checkpoint files and
//! copy frames.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Serialize a key or value
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Deserialize a key or value
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}
