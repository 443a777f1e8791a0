//! Canonical JSON encoding and SHA-256 helpers.
//!
//! Every hash in the system (policy content hash, decision idempotency key,
//! audit chain link) is computed over canonical JSON: object keys sorted,
//! compact separators. `serde_json::Map` is a `BTreeMap` unless the
//! `preserve_order` feature is enabled, so routing a value through
//! `serde_json::Value` yields sorted keys.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::WardenError;

/// Serialize `value` to canonical JSON (sorted keys, no whitespace).
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, WardenError> {
    let value = serde_json::to_value(value)
        .map_err(|e| WardenError::PersistenceError(format!("failed to encode value: {e}")))?;
    serde_json::to_string(&value)
        .map_err(|e| WardenError::PersistenceError(format!("failed to encode value: {e}")))
}

/// Hex-encoded SHA-256 of the given bytes.
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

/// Hex-encoded SHA-256 of the canonical JSON encoding of `value`.
pub fn canonical_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, WardenError> {
    Ok(sha256_hex(canonical_json(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_regardless_of_insertion_order() {
        let a = json!({"b": 1, "a": {"d": 2, "c": 3}});
        let b = json!({"a": {"c": 3, "d": 2}, "b": 1});
        assert_eq!(canonical_json(&a).unwrap(), r#"{"a":{"c":3,"d":2},"b":1}"#);
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
    }

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
