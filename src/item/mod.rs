//! Item Module
//!
//! The leaf data types of the store: one key's value at one commit version.
//!
//! ## Sequence Numbers
//! Sequence numbers and checkpoint LSNs are signed 64-bit and strictly
//! increasing. `INVALID_LSN` (-1) means "no checkpoint yet"; a copied replica's
//! first checkpoint may legitimately use `ZERO_LSN`.
//!
//! ## Version Lifetime
//! ```text
//!   begin = 10                      end = 20
//!   ├──────── visible "as of" S ────┤├──────── ...
//!   Inserted("a") @10 (closed)      Updated("b") @20 (end still open)
//! ```
//! An item's end sequence number is written exactly once, when a newer version
//! of the same key supersedes it. After that the item is frozen.

mod codec;
mod versioned;

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use codec::{decode, encode};
pub use versioned::{ItemValue, RecordKind, ValueLocation, VersionedItem, OPEN_SEQUENCE_NUMBER};

/// Sentinel for "no checkpoint / no version"
pub const INVALID_LSN: i64 = -1;

/// LSN of the first checkpoint after a copy or of an empty store
pub const ZERO_LSN: i64 = 0;

/// Key capability: total order plus a stable binary serialization
pub trait StoreKey:
    Ord + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> StoreKey for T where
    T: Ord + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Value capability: a stable binary serialization
pub trait StoreValue: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> StoreValue for T where
    T: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}
