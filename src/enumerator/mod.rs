//! Enumerator Module
//!
//! Forward-only, non-restartable cursors over sorted (key, versioned item)
//! sequences. They feed checkpoint merges, recovery validation and copy.
//!
//! ## Cursor Protocol
//! ```text
//!   created ── move_next() = true ──► positioned ── ... ──► move_next() = false
//!   (index -1)                        current() legal          terminal, stays false
//! ```
//! Calling `current()` while not positioned is a caller bug and panics.
//!
//! Array and file cursors can be limited to a key range; they seek to its
//! first key and stop after its last.

mod array;
mod merge;
mod recovery;

use std::ops::{Bound, RangeBounds};
use std::sync::Arc;

use crate::item::VersionedItem;

pub use array::ArrayKeyVersionedItemEnumerator;
pub use merge::MergeEnumerator;
pub use recovery::RecoveryStoreEnumerator;

/// Sorted (key, versioned item) cursor
pub trait StoreEnumerator<K, V> {
    /// Advance; false once the sequence is exhausted (and on every later call)
    fn move_next(&mut self) -> bool;

    /// The pair at the cursor. Panics unless the last `move_next` returned true.
    fn current(&self) -> (&K, &Arc<VersionedItem<V>>);
}

impl<K, V, E: StoreEnumerator<K, V> + ?Sized> StoreEnumerator<K, V> for Box<E> {
    fn move_next(&mut self) -> bool {
        (**self).move_next()
    }

    fn current(&self) -> (&K, &Arc<VersionedItem<V>>) {
        (**self).current()
    }
}

/// Whether `range` can hold no key at all (start after end, or a single
/// point with an excluded bound)
pub fn is_empty_range<K: Ord, R: RangeBounds<K>>(range: &R) -> bool {
    match (range.start_bound(), range.end_bound()) {
        (Bound::Included(first), Bound::Included(last)) => first > last,
        (Bound::Included(first), Bound::Excluded(last))
        | (Bound::Excluded(first), Bound::Included(last))
        | (Bound::Excluded(first), Bound::Excluded(last)) => first >= last,
        _ => false,
    }
}
