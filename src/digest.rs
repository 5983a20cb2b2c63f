// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Payload fingerprinting.
//!
//! A digest is the lowercase hex SHA-256 of the canonical JSON encoding of a
//! normalized payload. Normalization sorts map keys at every depth and leaves
//! sequence order alone, so two payloads that differ only in key insertion
//! order share a digest while reordered arrays do not.
//!
//! ```rust
//! use outbound_sync::digest::stable_digest;
//! use serde_json::json;
//!
//! assert_eq!(
//!     stable_digest(&json!({"a": 1, "b": [2, 3]})),
//!     stable_digest(&json!({"b": [2, 3], "a": 1})),
//! );
//! assert_ne!(
//!     stable_digest(&json!({"a": [1, 2, 3]})),
//!     stable_digest(&json!({"a": [3, 2, 1]})),
//! );
//! ```
//!
//! The strategy is pluggable through [`DigestStrategy`]; any
//! `Fn(&Value) -> String` is accepted.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Computes a fingerprint for a payload.
pub trait DigestStrategy: Send + Sync {
    /// Fingerprint `payload`. Must be pure.
    fn digest(&self, payload: &Value) -> String;
}

/// Default strategy: [`stable_digest`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StableDigest;

impl DigestStrategy for StableDigest {
    fn digest(&self, payload: &Value) -> String {
        stable_digest(payload)
    }
}

impl<F> DigestStrategy for F
where
    F: Fn(&Value) -> String + Send + Sync,
{
    fn digest(&self, payload: &Value) -> String {
        self(payload)
    }
}

/// Recursively sort map keys. Sequences keep their order; scalars pass through.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = Map::new();
            for (key, inner) in entries {
                out.insert(key.clone(), normalize(inner));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

/// SHA-256 of the compact JSON encoding of `normalize(value)`, 64 hex chars.
///
/// Keys are already sorted after [`normalize`], so the serde_json encoding is
/// canonical.
pub fn stable_digest(value: &Value) -> String {
    let canonical = normalize(value).to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}
