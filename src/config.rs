//! Configuration for TStore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::copy::MAX_FRAME_PAYLOAD;
use crate::error::{Result, StoreError};

/// Main configuration for a TStore instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Work folder for all persisted state.
    /// Internal structure:
    ///   {work_dir}/
    ///     ├── current_metadata.sfm      (live generation)
    ///     ├── temp_metadata.sfm         (next generation, pre-swap)
    ///     ├── backup_metadata.sfm       (only during a replace)
    ///     ├── checkpoint_000001.sfk     (key file)
    ///     ├── checkpoint_000001.sfv     (value file)
    ///     └── copy_staging/             (incoming copy, until promoted)
    pub work_dir: PathBuf,

    /// Persisted store (checkpoint files) or volatile store (memory only)
    pub has_persisted_state: bool,

    /// fsync checkpoint and metadata files before publishing them
    pub sync_files: bool,

    // -------------------------------------------------------------------------
    // Checkpoint Configuration
    // -------------------------------------------------------------------------
    /// When to fold existing checkpoint files into the new one
    pub merge_policy: MergePolicy,

    // -------------------------------------------------------------------------
    // Copy Configuration
    // -------------------------------------------------------------------------
    /// Maximum payload bytes per copy data frame (at most `MAX_FRAME_PAYLOAD`)
    pub copy_chunk_size: usize,

    // -------------------------------------------------------------------------
    // Lifecycle Configuration
    // -------------------------------------------------------------------------
    /// Upper bound on waiting for metadata table readers to drain (milliseconds)
    pub close_timeout_ms: u64,
}

/// Checkpoint merge policy
#[derive(Debug, Clone, Copy)]
pub struct MergePolicy {
    /// Merge every live file into the new checkpoint once the next generation
    /// would hold more files than this. 1 means every checkpoint is a full merge.
    pub file_count_threshold: usize,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            file_count_threshold: 1,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./tstore_data"),
            has_persisted_state: true,
            sync_files: true,
            merge_policy: MergePolicy::default(),
            copy_chunk_size: 512 * 1024, // 512 KB
            close_timeout_ms: 30_000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check values that would otherwise fail deep inside checkpoint or copy
    pub fn validate(&self) -> Result<()> {
        if self.copy_chunk_size == 0 {
            return Err(StoreError::Config(
                "copy_chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.copy_chunk_size > MAX_FRAME_PAYLOAD as usize {
            return Err(StoreError::Config(format!(
                "copy_chunk_size {} exceeds the {} byte copy frame limit",
                self.copy_chunk_size, MAX_FRAME_PAYLOAD
            )));
        }
        if self.merge_policy.file_count_threshold == 0 {
            return Err(StoreError::Config(
                "merge_policy.file_count_threshold must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the work folder (root for all persisted state)
    pub fn work_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.work_dir = path.into();
        self
    }

    /// Choose between a persisted and a volatile store
    pub fn has_persisted_state(mut self, persisted: bool) -> Self {
        self.config.has_persisted_state = persisted;
        self
    }

    /// Enable or disable fsync of checkpoint and metadata files
    pub fn sync_files(mut self, sync: bool) -> Self {
        self.config.sync_files = sync;
        self
    }

    /// Set the merge file-count threshold
    pub fn merge_file_count_threshold(mut self, threshold: usize) -> Self {
        self.config.merge_policy.file_count_threshold = threshold;
        self
    }

    /// Set the copy chunk size (in bytes)
    pub fn copy_chunk_size(mut self, size: usize) -> Self {
        self.config.copy_chunk_size = size;
        self
    }

    /// Set the close timeout (in milliseconds)
    pub fn close_timeout_ms(mut self, ms: u64) -> Self {
        self.config.close_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
