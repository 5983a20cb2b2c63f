// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL text helpers shared by the finder, record loader and row lock.

use crate::error::{Result, SyncError};

/// Epoch sentinel for missing or null modification times (unix millis).
pub const EPOCH: &str = "0";

/// Reject anything that is not a plain identifier.
pub fn validate_identifier(ident: &str) -> Result<()> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SyncError::Config(format!("Invalid SQL identifier: {:?}", ident)))
    }
}

/// Double-quote an identifier. Callers validate at registration.
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `alias."column"`.
pub fn column(alias: &str, column: &str) -> String {
    format!("{}.{}", alias, quote(column))
}

/// Greatest of several timestamp expressions.
///
/// SQLite's `MAX` is the scalar greatest-of with two or more arguments and
/// the aggregate with one, so a lone expression is returned unwrapped and an
/// empty list collapses to the epoch sentinel.
pub fn greatest(mut exprs: Vec<String>) -> String {
    match exprs.len() {
        0 => EPOCH.to_string(),
        1 => exprs.remove(0),
        _ => format!("MAX({})", exprs.join(", ")),
    }
}

/// `COALESCE(expr, 0)`.
pub fn or_epoch(expr: &str) -> String {
    format!("COALESCE({}, {})", expr, EPOCH)
}
