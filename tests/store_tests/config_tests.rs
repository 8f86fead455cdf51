//! Tests for configuration validation

use tstore::copy::MAX_FRAME_PAYLOAD;
use tstore::{Config, StoreError};

#[test]
fn test_chunk_size_at_frame_limit_accepted() {
    let config = Config::builder()
        .has_persisted_state(false)
        .copy_chunk_size(MAX_FRAME_PAYLOAD as usize)
        .build();
    assert!(config.is_ok());
}

#[test]
fn test_chunk_size_over_frame_limit_rejected() {
    let config = Config::builder()
        .has_persisted_state(false)
        .copy_chunk_size(MAX_FRAME_PAYLOAD as usize + 1)
        .build();
    assert!(matches!(config, Err(StoreError::Config(_))));
}

#[test]
fn test_zero_chunk_size_rejected() {
    let config = Config::builder()
        .has_persisted_state(false)
        .copy_chunk_size(0)
        .build();
    assert!(matches!(config, Err(StoreError::Config(_))));
}
