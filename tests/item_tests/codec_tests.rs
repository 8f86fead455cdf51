//! Tests for key/value serialization

use tstore::item::{decode, encode};
use tstore::StoreError;

#[test]
fn test_round_trip() {
    let bytes = encode(&(42u64, "value".to_string())).unwrap();
    let decoded: (u64, String) = decode(&bytes).unwrap();
    assert_eq!(decoded, (42, "value".to_string()));
}

#[test]
fn test_decode_garbage() {
    let result = decode::<String>(&[0xff; 8]);
    assert!(matches!(result, Err(StoreError::Serialization(_))));
}

#[test]
fn test_encoding_is_deterministic() {
    let value = vec!["a".to_string(), "b".to_string()];
    assert_eq!(encode(&value).unwrap(), encode(&value).unwrap());

    // Fixed-width little-endian integers
    assert_eq!(encode(&1u32).unwrap(), vec![1, 0, 0, 0]);
}
