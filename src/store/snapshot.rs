//! Point-in-time reads

use std::ops::RangeBounds;

use crate::differential::ReadSnapshot;
use crate::error::Result;
use crate::item::{StoreKey, StoreValue};

use super::components::ComponentView;
use super::StoreComponentReadResult;

/// A registered read snapshot together with the components it reads from.
///
/// While it lives, garbage collection keeps every version it can see and the
/// generation it pinned keeps its files.
pub struct StoreSnapshot<K, V> {
    snapshot: ReadSnapshot,
    view: ComponentView<K, V>,
}

impl<K: StoreKey, V: StoreValue> StoreSnapshot<K, V> {
    pub(crate) fn new(snapshot: ReadSnapshot, view: ComponentView<K, V>) -> Self {
        Self { snapshot, view }
    }

    /// Reads see every write with a sequence number at or below this
    pub fn sequence_number(&self) -> i64 {
        self.snapshot.sequence_number()
    }

    pub fn read(&self, key: &K) -> Result<StoreComponentReadResult<V>> {
        self.view.read_at(key, self.sequence_number())
    }

    pub fn get(&self, key: &K) -> Result<Option<V>> {
        Ok(self.read(key)?.into_value())
    }

    /// Every visible (key, value) pair in key order
    pub fn entries(&self) -> Result<Vec<(K, V)>> {
        let mut enumerator = self.view.enumerate_at(Some(self.sequence_number()));
        self.view.collect_values(&mut enumerator)
    }

    /// Keys in `range` as this snapshot sees them
    pub fn keys<R: RangeBounds<K>>(&self, range: R) -> Result<Vec<K>> {
        let mut enumerator = self.view.enumerate_range(&range, Some(self.sequence_number()));
        Ok(self.view.collect_keys(&mut enumerator))
    }
}
