//! # TStore
//!
//! A replicated, checkpointed, versioned key-value store engine with:
//! - Multi-version items keyed by commit sequence number
//! - Three-phase checkpoints into immutable key/value file pairs
//! - Reference-counted metadata table generations with crash-safe replace
//! - A chunked copy protocol to bring replicas up to date
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Replication Layer                        │
//! │      (assigns sequence numbers, logs and replays ops)       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ add / update / remove / apply
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        TStore                               │
//! │            (Single Writer / Multi Reader)                   │
//! └──────┬──────────────────────┬─────────────────────┬─────────┘
//!        │                      │                     │
//!        ▼                      ▼                     ▼
//! ┌─────────────┐       ┌──────────────┐      ┌──────────────┐
//! │ Differential│──────►│  Checkpoint  │◄─────│ Copy Stream  │
//! │  + Delta    │ merge │ Files (.sfk/ │ read │ / Session    │
//! │  (RwLock)   │       │  .sfv)       │      │              │
//! └─────────────┘       └──────┬───────┘      └──────────────┘
//!                              │
//!                              ▼
//!                      ┌──────────────┐
//!                      │ MetadataTable│
//!                      │ (generation) │
//!                      └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod cancellation;

pub mod item;
pub mod differential;
pub mod checkpoint;
pub mod metadata;
pub mod enumerator;
pub mod copy;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use cancellation::CancellationToken;
pub use config::{Config, MergePolicy};
pub use error::{Result, StoreError};
pub use item::{StoreKey, StoreValue, VersionedItem, INVALID_LSN, ZERO_LSN};
pub use store::{
    OperationRecord, StoreComponentReadResult, StoreOperation, StoreSnapshot, TStore,
};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of TStore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
