//! Metadata Module
//!
//! Tracks which checkpoint files make up each durable generation of the
//! store, and when those files may be deleted.
//!
//! ## Responsibilities
//! - One `MetadataTable` per checkpoint generation (never mutated once published)
//! - Reference counting of generations by readers (enumerators, copy streams)
//! - Reference counting of files by generations (files outlive a generation
//!   when the next one keeps them)
//! - Persisting the live generation to `current_metadata.sfm` with a
//!   crash-safe replace
//!
//! ## Lifecycle
//! ```text
//!  create (refs = 1, owner)
//!     │  try_acquire()  → lease (refs + 1)     fails once closing
//!     │  drop(lease)    → refs - 1
//!     ▼
//!  begin_close()  → closing bit set, owner ref released
//!     │
//!     ▼  refs == 0
//!  drained → every file releases this generation's reference;
//!            files marked deletable with no remaining generation are removed
//! ```

mod file_metadata;
mod manager;
mod table;

pub use file_metadata::FileMetadata;
pub use manager::{
    MetadataManager, BACKUP_METADATA_FILE_NAME, CURRENT_METADATA_FILE_NAME,
    TEMP_METADATA_FILE_NAME,
};
pub use table::{MetadataLease, MetadataTable};

pub(crate) use manager::remove_if_exists;
