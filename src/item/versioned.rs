//! VersionedItem implementation

use std::sync::atomic::{AtomicI64, Ordering};

/// End sequence number of a version that has not been superseded
pub const OPEN_SEQUENCE_NUMBER: i64 = i64::MAX;

/// What kind of write produced a version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    Inserted = 0,
    Updated = 1,
    Deleted = 2,
}

impl RecordKind {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(RecordKind::Inserted),
            1 => Some(RecordKind::Updated),
            2 => Some(RecordKind::Deleted),
            _ => None,
        }
    }
}

/// Where a value lives inside a checkpoint value file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueLocation {
    pub file_id: u32,
    pub offset: u64,
    pub size: u32,
}

/// The payload of a version
#[derive(Debug, Clone, PartialEq)]
pub enum ItemValue<V> {
    /// Held in memory (differential state, volatile store, copy)
    Memory(V),
    /// Serialized in a checkpoint value file, materialized on read
    Disk(ValueLocation),
    /// Tombstone
    Absent,
}

/// One key's value at one commit version
#[derive(Debug)]
pub struct VersionedItem<V> {
    kind: RecordKind,
    value: ItemValue<V>,
    version_sequence_number: i64,
    end_sequence_number: AtomicI64,
    ttl: Option<u64>,
}

impl<V> VersionedItem<V> {
    /// New version for a key that did not exist
    pub fn inserted(value: V, sequence_number: i64) -> Self {
        Self::new(RecordKind::Inserted, ItemValue::Memory(value), sequence_number)
    }

    /// New version replacing an existing value
    pub fn updated(value: V, sequence_number: i64) -> Self {
        Self::new(RecordKind::Updated, ItemValue::Memory(value), sequence_number)
    }

    /// Tombstone
    pub fn deleted(sequence_number: i64) -> Self {
        Self::new(RecordKind::Deleted, ItemValue::Absent, sequence_number)
    }

    /// Version read back from a checkpoint key file
    pub fn from_parts(
        kind: RecordKind,
        value: ItemValue<V>,
        version_sequence_number: i64,
        end_sequence_number: i64,
        ttl: Option<u64>,
    ) -> Self {
        assert!(
            end_sequence_number >= version_sequence_number,
            "end sequence number {} precedes begin {}",
            end_sequence_number,
            version_sequence_number
        );
        Self {
            kind,
            value,
            version_sequence_number,
            end_sequence_number: AtomicI64::new(end_sequence_number),
            ttl,
        }
    }

    fn new(kind: RecordKind, value: ItemValue<V>, sequence_number: i64) -> Self {
        Self {
            kind,
            value,
            version_sequence_number: sequence_number,
            end_sequence_number: AtomicI64::new(OPEN_SEQUENCE_NUMBER),
            ttl: None,
        }
    }

    /// Attach a time-to-live (milliseconds)
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn is_deleted(&self) -> bool {
        self.kind == RecordKind::Deleted
    }

    pub fn value(&self) -> &ItemValue<V> {
        &self.value
    }

    /// The value if it is held in memory
    pub fn in_memory_value(&self) -> Option<&V> {
        match &self.value {
            ItemValue::Memory(v) => Some(v),
            _ => None,
        }
    }

    /// Begin sequence number (commit version that created this item)
    pub fn version_sequence_number(&self) -> i64 {
        self.version_sequence_number
    }

    /// End sequence number, `None` while this is the current version
    pub fn end_sequence_number(&self) -> Option<i64> {
        match self.end_sequence_number.load(Ordering::Acquire) {
            OPEN_SEQUENCE_NUMBER => None,
            end => Some(end),
        }
    }

    /// Raw end sequence number, `OPEN_SEQUENCE_NUMBER` while open
    pub fn raw_end_sequence_number(&self) -> i64 {
        self.end_sequence_number.load(Ordering::Acquire)
    }

    pub fn ttl(&self) -> Option<u64> {
        self.ttl
    }

    /// Mark this version superseded at `sequence_number`.
    ///
    /// Panics if the end was already closed or would precede the begin.
    pub fn close_end(&self, sequence_number: i64) {
        assert!(
            sequence_number >= self.version_sequence_number,
            "superseding sequence number {} precedes begin {}",
            sequence_number,
            self.version_sequence_number
        );
        let previous = self.end_sequence_number.compare_exchange(
            OPEN_SEQUENCE_NUMBER,
            sequence_number,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        assert!(
            previous.is_ok(),
            "versioned item @{} already superseded",
            self.version_sequence_number
        );
    }

    /// Whether a read "as of" `sequence_number` sees this version
    pub fn is_visible_at(&self, sequence_number: i64) -> bool {
        self.version_sequence_number <= sequence_number
            && sequence_number < self.raw_end_sequence_number()
    }
}

impl<V: Clone> Clone for VersionedItem<V> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            value: self.value.clone(),
            version_sequence_number: self.version_sequence_number,
            end_sequence_number: AtomicI64::new(self.raw_end_sequence_number()),
            ttl: self.ttl,
        }
    }
}

impl<V: PartialEq> PartialEq for VersionedItem<V> {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.value == other.value
            && self.version_sequence_number == other.version_sequence_number
            && self.raw_end_sequence_number() == other.raw_end_sequence_number()
            && self.ttl == other.ttl
    }
}
