//! Fuzz target for payload digests.
//!
//! Any JSON document must digest without panicking, and its normalized form
//! must digest identically.

#![no_main]

use libfuzzer_sys::fuzz_target;
use outbound_sync::digest::{normalize, stable_digest};

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };

    let digest = stable_digest(&value);
    assert_eq!(digest.len(), 64);
    assert_eq!(digest, stable_digest(&normalize(&value)));
});
