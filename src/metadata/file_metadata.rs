//! Per-checkpoint-file metadata

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::checkpoint::{key_file_path, value_file_path};

use super::manager::remove_if_exists;

/// Metadata of one key/value file pair.
///
/// Referenced by every generation (metadata table) that contains it. The
/// files are removed once the pair is marked deletable and no generation
/// references it any more.
#[derive(Debug)]
pub struct FileMetadata {
    file_id: u32,
    file_name: String,
    dir: PathBuf,
    total_number_of_entries: u64,
    number_of_valid_entries: u64,
    number_of_deleted_entries: u64,
    key_file_size: u64,
    value_file_size: u64,
    reference_count: AtomicU64,
    can_be_deleted: AtomicBool,
    deleted: AtomicBool,
}

impl FileMetadata {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dir: &Path,
        file_id: u32,
        file_name: impl Into<String>,
        total_number_of_entries: u64,
        number_of_valid_entries: u64,
        number_of_deleted_entries: u64,
        key_file_size: u64,
        value_file_size: u64,
    ) -> Self {
        Self {
            file_id,
            file_name: file_name.into(),
            dir: dir.to_path_buf(),
            total_number_of_entries,
            number_of_valid_entries,
            number_of_deleted_entries,
            key_file_size,
            value_file_size,
            reference_count: AtomicU64::new(0),
            can_be_deleted: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
        }
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn key_file_path(&self) -> PathBuf {
        key_file_path(&self.dir, &self.file_name)
    }

    pub fn value_file_path(&self) -> PathBuf {
        value_file_path(&self.dir, &self.file_name)
    }

    pub fn total_number_of_entries(&self) -> u64 {
        self.total_number_of_entries
    }

    pub fn number_of_valid_entries(&self) -> u64 {
        self.number_of_valid_entries
    }

    pub fn number_of_deleted_entries(&self) -> u64 {
        self.number_of_deleted_entries
    }

    pub fn key_file_size(&self) -> u64 {
        self.key_file_size
    }

    pub fn value_file_size(&self) -> u64 {
        self.value_file_size
    }

    /// Combined on-disk size of the pair
    pub fn disk_size(&self) -> u64 {
        self.key_file_size + self.value_file_size
    }

    pub fn reference_count(&self) -> u64 {
        self.reference_count.load(Ordering::Acquire)
    }

    pub fn can_be_deleted(&self) -> bool {
        self.can_be_deleted.load(Ordering::Acquire)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// A generation starts referencing this file
    pub(crate) fn add_reference(&self) {
        assert!(
            !self.is_deleted(),
            "file {} referenced after deletion",
            self.file_id
        );
        self.reference_count.fetch_add(1, Ordering::AcqRel);
    }

    /// A generation stopped referencing this file
    pub(crate) fn release_reference(&self) {
        // SeqCst pairs with mark_for_deletion: of the last release and the
        // mark, at least one observes the other
        let previous = self.reference_count.fetch_sub(1, Ordering::SeqCst);
        assert!(previous > 0, "file {} reference count underflow", self.file_id);
        if previous == 1 && self.can_be_deleted.load(Ordering::SeqCst) {
            self.delete_files();
        }
    }

    /// Allow deletion once no generation references the file
    pub fn mark_for_deletion(&self) {
        self.can_be_deleted.store(true, Ordering::SeqCst);
        if self.reference_count.load(Ordering::SeqCst) == 0 {
            self.delete_files();
        }
    }

    fn delete_files(&self) {
        if self.deleted.swap(true, Ordering::AcqRel) {
            return;
        }
        for path in [self.key_file_path(), self.value_file_path()] {
            if let Err(e) = remove_if_exists(&path) {
                tracing::warn!("Failed to delete checkpoint file {}: {}", path.display(), e);
            }
        }
        tracing::debug!(file_id = self.file_id, "Deleted checkpoint file pair");
    }
}
