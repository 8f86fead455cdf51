//! Differential Module
//!
//! In-memory buffer of writes that have not been checkpointed yet.
//!
//! ## Responsibilities
//! - Hold the version chain of every key written since the last checkpoint
//! - Answer latest-version and "as of sequence number" reads
//! - Retain superseded versions while an active read snapshot can see them
//! - Produce a sorted view of its contents for checkpoint and enumeration
//!
//! ## Data Structure Choice
//! `BTreeMap<K, VersionChain>` behind a `RwLock`:
//! - Ordered keys (checkpoint files are written in key order)
//! - Single writer (writes are serialized upstream), many readers
//! - Chains are newest-first so the common read is the chain head

mod component;
mod snapshot;

pub use component::{DifferentialComponent, VersionChain};
pub use snapshot::{ReadSnapshot, SnapshotRegistry};
