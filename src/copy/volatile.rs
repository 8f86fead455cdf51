//! Volatile store copy
//!
//! No files: the visible items are streamed as serialized records.
//!
//! ```text
//! Metadata payload: [SerializationVersion: u16][ItemCount: u64]
//! Data payload:     record*
//! record:           [Flags: u8][Kind: u8][Version: i64]
//!                   [KeyLen: u32][Key][ValueLen: u32][Value][Ttl: u64 if HasTTL]
//! ```

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, StoreError};
use crate::item::RecordKind;

use super::codec::{u32_payload, MAX_FRAME_PAYLOAD};
use super::{
    CopyFrame, VolatileStoreCopyOperation, VolatileStoreCopyOptionalFlags, COPY_PROTOCOL_VERSION,
    VOLATILE_SERIALIZATION_VERSION,
};

const RECORD_FIXED_SIZE: usize = 1 + 1 + 8 + 4 + 4;

/// One serialized key/value pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolatileRecord {
    pub kind: RecordKind,
    pub version_sequence_number: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub ttl: Option<u64>,
}

impl VolatileRecord {
    fn encoded_len(&self) -> usize {
        RECORD_FIXED_SIZE + self.key.len() + self.value.len() + if self.ttl.is_some() { 8 } else { 0 }
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        let mut flags = VolatileStoreCopyOptionalFlags::NONE;
        if self.ttl.is_some() {
            flags.insert(VolatileStoreCopyOptionalFlags::HAS_TTL);
        }
        buf.put_u8(flags.bits());
        buf.put_u8(self.kind as u8);
        buf.put_i64_le(self.version_sequence_number);
        buf.put_u32_le(self.key.len() as u32);
        buf.put_slice(&self.key);
        buf.put_u32_le(self.value.len() as u32);
        buf.put_slice(&self.value);
        if let Some(ttl) = self.ttl {
            buf.put_u64_le(ttl);
        }
    }

    fn decode_all(payload: &[u8]) -> Result<Vec<VolatileRecord>> {
        let mut reader = PayloadReader { bytes: payload, pos: 0 };
        let mut records = Vec::new();
        while !reader.is_empty() {
            let flags = VolatileStoreCopyOptionalFlags::from_bits(reader.u8()?)?;
            let kind_byte = reader.u8()?;
            let kind = RecordKind::from_u8(kind_byte).ok_or_else(|| {
                StoreError::Copy(format!("unknown record kind {}", kind_byte))
            })?;
            let version_sequence_number = reader.u64()? as i64;
            let key_len = reader.u32()? as usize;
            let key = reader.take(key_len)?.to_vec();
            let value_len = reader.u32()? as usize;
            let value = reader.take(value_len)?.to_vec();
            let ttl = if flags.contains(VolatileStoreCopyOptionalFlags::HAS_TTL) {
                Some(reader.u64()?)
            } else {
                None
            };
            records.push(VolatileRecord {
                kind,
                version_sequence_number,
                key,
                value,
                ttl,
            });
        }
        Ok(records)
    }
}

struct PayloadReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos + len;
        if end > self.bytes.len() {
            return Err(StoreError::Copy("truncated volatile copy record".into()));
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }
}

// =============================================================================
// Sender
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VolatileSendState {
    Version,
    Metadata,
    Data,
    Complete,
    Done,
}

/// Frame sequence over a materialized set of records
pub struct VolatileCopyStream {
    records: VecDeque<VolatileRecord>,
    item_count: u64,
    chunk_size: usize,
    state: VolatileSendState,
}

impl VolatileCopyStream {
    pub fn new(records: Vec<VolatileRecord>, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "copy chunk size must be positive");
        Self {
            item_count: records.len() as u64,
            records: records.into(),
            chunk_size,
            state: VolatileSendState::Version,
        }
    }

    pub fn item_count(&self) -> u64 {
        self.item_count
    }

    pub fn next_frame(&mut self) -> Result<Option<CopyFrame>> {
        let frame = match self.state {
            VolatileSendState::Version => {
                tracing::info!(items = self.item_count, "Starting volatile store copy");
                self.state = VolatileSendState::Metadata;
                CopyFrame::volatile(
                    VolatileStoreCopyOperation::Version,
                    u32_payload(COPY_PROTOCOL_VERSION),
                )
            }
            VolatileSendState::Metadata => {
                let mut payload = BytesMut::with_capacity(10);
                payload.put_u16_le(VOLATILE_SERIALIZATION_VERSION);
                payload.put_u64_le(self.item_count);
                self.state = if self.records.is_empty() {
                    VolatileSendState::Complete
                } else {
                    VolatileSendState::Data
                };
                CopyFrame::volatile(VolatileStoreCopyOperation::Metadata, payload.freeze())
            }
            VolatileSendState::Data => {
                let frame = CopyFrame::volatile(VolatileStoreCopyOperation::Data, self.next_batch()?);
                if self.records.is_empty() {
                    self.state = VolatileSendState::Complete;
                }
                frame
            }
            VolatileSendState::Complete => {
                tracing::info!(items = self.item_count, "Volatile store copy complete");
                self.state = VolatileSendState::Done;
                CopyFrame::volatile(VolatileStoreCopyOperation::Complete, Bytes::new())
            }
            VolatileSendState::Done => return Ok(None),
        };
        Ok(Some(frame))
    }

    /// Records up to the chunk size; always at least one. A record that
    /// cannot fit in any frame fails the copy.
    fn next_batch(&mut self) -> Result<Bytes> {
        let limit = self.chunk_size.min(MAX_FRAME_PAYLOAD as usize);
        let mut buf = BytesMut::with_capacity(limit);
        while let Some(record) = self.records.front() {
            let len = record.encoded_len();
            if len > MAX_FRAME_PAYLOAD as usize {
                return Err(StoreError::Copy(format!(
                    "record of {} bytes (key {} bytes) exceeds the {} byte frame limit",
                    len,
                    record.key.len(),
                    MAX_FRAME_PAYLOAD
                )));
            }
            if !buf.is_empty() && buf.len() + len > limit {
                break;
            }
            record.encode_into(&mut buf);
            self.records.pop_front();
        }
        Ok(buf.freeze())
    }
}

// =============================================================================
// Receiver
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolatileCopySessionState {
    ExpectVersion,
    ExpectMetadata,
    InData,
    Completed,
    Failed,
}

/// Receiving side of one volatile copy
pub struct VolatileCopySession {
    state: VolatileCopySessionState,
    expected_count: u64,
    records: Vec<VolatileRecord>,
}

impl VolatileCopySession {
    pub fn new() -> Self {
        Self {
            state: VolatileCopySessionState::ExpectVersion,
            expected_count: 0,
            records: Vec::new(),
        }
    }

    pub fn state(&self) -> VolatileCopySessionState {
        self.state
    }

    pub fn is_completed(&self) -> bool {
        self.state == VolatileCopySessionState::Completed
    }

    pub fn advance(&mut self, frame: &CopyFrame) -> Result<()> {
        if self.state == VolatileCopySessionState::Failed {
            return Err(StoreError::Copy("copy session already failed".into()));
        }
        let result = VolatileStoreCopyOperation::try_from(frame.operation())
            .and_then(|operation| self.transition(operation, frame));
        if let Err(e) = &result {
            tracing::warn!(state = ?self.state, "Volatile copy session failed: {}", e);
            self.state = VolatileCopySessionState::Failed;
        }
        result
    }

    fn transition(&mut self, operation: VolatileStoreCopyOperation, frame: &CopyFrame) -> Result<()> {
        use VolatileCopySessionState as S;
        use VolatileStoreCopyOperation as Op;

        match (self.state, operation) {
            (S::ExpectVersion, Op::Version) => {
                let version = super::codec::parse_u32(frame, "Version")?;
                if version != COPY_PROTOCOL_VERSION {
                    return Err(StoreError::Copy(format!(
                        "unsupported copy protocol version {}",
                        version
                    )));
                }
                self.state = S::ExpectMetadata;
            }
            (S::ExpectMetadata, Op::Metadata) => {
                let payload = frame.payload();
                if payload.len() != 10 {
                    return Err(StoreError::Copy(format!(
                        "Metadata: expected 10 byte payload, got {}",
                        payload.len()
                    )));
                }
                let version = u16::from_le_bytes([payload[0], payload[1]]);
                if version != VOLATILE_SERIALIZATION_VERSION {
                    return Err(StoreError::Copy(format!(
                        "unsupported volatile serialization version {}",
                        version
                    )));
                }
                let mut count = [0u8; 8];
                count.copy_from_slice(&payload[2..10]);
                self.expected_count = u64::from_le_bytes(count);
                self.records.reserve(self.expected_count.min(1 << 20) as usize);
                self.state = S::InData;
            }
            (S::InData, Op::Data) => {
                self.records.extend(VolatileRecord::decode_all(frame.payload())?);
                if self.records.len() as u64 > self.expected_count {
                    return Err(StoreError::Copy(format!(
                        "received more than the announced {} items",
                        self.expected_count
                    )));
                }
            }
            (S::InData, Op::Complete) => {
                if self.records.len() as u64 != self.expected_count {
                    return Err(StoreError::Copy(format!(
                        "received {} items, {} announced",
                        self.records.len(),
                        self.expected_count
                    )));
                }
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

    /// Received records. Fails unless `Complete` arrived.
    pub fn finish(self) -> Result<Vec<VolatileRecord>> {
        if !self.is_completed() {
            return Err(StoreError::CopyAborted);
        }
        Ok(self.records)
    }
}

impl Default for VolatileCopySession {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for VolatileCopyStream {
    type Item = Result<CopyFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}
