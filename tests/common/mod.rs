//! Shared test utilities for integration tests.
//!
//! This module provides:
//! - A recording mock destination
//! - The fixture schema and registry (companies, contacts, deals, notes, taggings)
//! - Redis testcontainer setup
//! - Opt-in log output via `RUST_LOG`

#![allow(dead_code)]

pub mod containers;
pub mod fixtures;
pub mod mock_destination;

pub use containers::*;
pub use fixtures::*;
pub use mock_destination::*;

/// Route `tracing` output to the test harness when `RUST_LOG` is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
