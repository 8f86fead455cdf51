//! Copy frame codec
//!
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │  Op (1)  │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//! Length is little-endian, like every other integer the store writes.

use std::io::{Read, Write};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, StoreError};

use super::{StoreCopyOperation, VolatileStoreCopyOperation};

/// Header size: 1 byte operation + 4 bytes length
pub const FRAME_HEADER_SIZE: usize = 5;

/// Maximum payload size (64 MB)
pub const MAX_FRAME_PAYLOAD: u32 = 64 * 1024 * 1024;

/// One copy protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFrame {
    operation: u8,
    payload: Bytes,
}

impl CopyFrame {
    pub fn new(operation: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            operation,
            payload: payload.into(),
        }
    }

    pub fn persisted(operation: StoreCopyOperation, payload: impl Into<Bytes>) -> Self {
        Self::new(operation as u8, payload)
    }

    pub fn volatile(operation: VolatileStoreCopyOperation, payload: impl Into<Bytes>) -> Self {
        Self::new(operation as u8, payload)
    }

    /// Raw operation byte
    pub fn operation(&self) -> u8 {
        self.operation
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }

    /// Encode header + payload. A payload the receiver would reject is
    /// refused here instead of being sent.
    pub fn encode(&self) -> Result<Bytes> {
        let payload_len = u32::try_from(self.payload.len()).map_err(|_| {
            StoreError::Copy(format!(
                "Payload too large: {} bytes (max {})",
                self.payload.len(),
                MAX_FRAME_PAYLOAD
            ))
        })?;
        check_payload_len(payload_len)?;

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.operation);
        buf.put_u32_le(payload_len);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode exactly one frame from `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return Err(StoreError::Copy(format!(
                "Incomplete frame header: expected {} bytes, got {}",
                FRAME_HEADER_SIZE,
                bytes.len()
            )));
        }

        let payload_len = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        check_payload_len(payload_len)?;

        let total_len = FRAME_HEADER_SIZE + payload_len as usize;
        if bytes.len() != total_len {
            return Err(StoreError::Copy(format!(
                "Frame length mismatch: expected {} bytes, got {}",
                total_len,
                bytes.len()
            )));
        }

        Ok(Self::new(
            bytes[0],
            Bytes::copy_from_slice(&bytes[FRAME_HEADER_SIZE..]),
        ))
    }
}

fn check_payload_len(payload_len: u32) -> Result<()> {
    if payload_len > MAX_FRAME_PAYLOAD {
        return Err(StoreError::Copy(format!(
            "Payload too large: {} bytes (max {})",
            payload_len, MAX_FRAME_PAYLOAD
        )));
    }
    Ok(())
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read one frame from a stream. `Ok(None)` on a clean end of stream.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<CopyFrame>> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    if reader.read(&mut header[..1])? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut header[1..])?;

    let payload_len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
    check_payload_len(payload_len)?;

    let mut payload = vec![0u8; payload_len as usize];
    if payload_len > 0 {
        reader.read_exact(&mut payload)?;
    }

    Ok(Some(CopyFrame::new(header[0], payload)))
}

/// Write one frame to a stream
pub fn write_frame<W: Write>(writer: &mut W, frame: &CopyFrame) -> Result<()> {
    writer.write_all(&frame.encode()?)?;
    writer.flush()?;
    Ok(())
}

// =============================================================================
// Payload helpers
// =============================================================================

pub(crate) fn u32_payload(value: u32) -> Bytes {
    Bytes::copy_from_slice(&value.to_le_bytes())
}

pub(crate) fn u64_payload(value: u64) -> Bytes {
    Bytes::copy_from_slice(&value.to_le_bytes())
}

pub(crate) fn parse_u32(frame: &CopyFrame, what: &str) -> Result<u32> {
    let bytes: [u8; 4] = frame.payload[..].try_into().map_err(|_| {
        StoreError::Copy(format!(
            "{}: expected 4 byte payload, got {}",
            what,
            frame.payload.len()
        ))
    })?;
    Ok(u32::from_le_bytes(bytes))
}

pub(crate) fn parse_u64(frame: &CopyFrame, what: &str) -> Result<u64> {
    let bytes: [u8; 8] = frame.payload[..].try_into().map_err(|_| {
        StoreError::Copy(format!(
            "{}: expected 8 byte payload, got {}",
            what,
            frame.payload.len()
        ))
    })?;
    Ok(u64::from_le_bytes(bytes))
}
