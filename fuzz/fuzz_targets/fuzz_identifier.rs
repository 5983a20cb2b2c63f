//! Fuzz target for SQL identifier validation.
//!
//! Validation must never panic, and anything it accepts must quote to a
//! plain double-quoted name with nothing to escape.

#![no_main]

use libfuzzer_sys::fuzz_target;
use outbound_sync::sql::{quote, validate_identifier};

fuzz_target!(|ident: &str| {
    if validate_identifier(ident).is_ok() {
        assert!(!ident.is_empty());
        assert_eq!(quote(ident), format!("\"{}\"", ident));
    }
});
