// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Destination adapter interface.
//!
//! A destination is an external system with two operations: create-or-update
//! an object and delete an object by its remote id. The synchronizer and
//! deleter only ever talk to a destination through [`Destination`].
//!
//! # Example
//!
//! ```rust,no_run
//! use outbound_sync::destination::{BoxFuture, Destination};
//! use serde_json::{Map, Value};
//!
//! struct Stdout;
//!
//! impl Destination for Stdout {
//!     fn upsert<'a>(
//!         &'a self,
//!         object_type: &'a str,
//!         payload: &'a Map<String, Value>,
//!         _identity_property: Option<&'a str>,
//!     ) -> BoxFuture<'a, String> {
//!         Box::pin(async move {
//!             println!("{object_type}: {payload:?}");
//!             Ok("1".to_string())
//!         })
//!     }
//!
//!     fn delete<'a>(&'a self, _object_type: &'a str, _remote_id: &'a str) -> BoxFuture<'a, bool> {
//!         Box::pin(async move { Ok(true) })
//!     }
//! }
//! ```

mod error;
pub mod http;

pub use error::{ApiError, ApiErrorKind, DestinationError};
pub use http::HttpDestination;

use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;

/// Result type for destination operations.
pub type DestinationResult<T> = std::result::Result<T, DestinationError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = DestinationResult<T>> + Send + 'a>>;

/// What the synchronizer and deleter need from an external system.
pub trait Destination: Send + Sync + 'static {
    /// Create or update an object and return its remote id.
    ///
    /// When `identity_property` is set and present in `payload`, adapters
    /// should match an existing object on that property before creating.
    fn upsert<'a>(
        &'a self,
        object_type: &'a str,
        payload: &'a Map<String, Value>,
        identity_property: Option<&'a str>,
    ) -> BoxFuture<'a, String>;

    /// Delete an object by remote id.
    ///
    /// Returns `true` when the destination confirmed removal and `false` when
    /// the object was already absent.
    fn delete<'a>(&'a self, object_type: &'a str, remote_id: &'a str) -> BoxFuture<'a, bool>;
}

/// A destination that logs calls and stores nothing.
///
/// Useful for dry runs: the remote id is derived from the identity property
/// value when present, otherwise from the payload digest.
#[derive(Debug, Clone, Default)]
pub struct NoOpDestination;

impl Destination for NoOpDestination {
    fn upsert<'a>(
        &'a self,
        object_type: &'a str,
        payload: &'a Map<String, Value>,
        identity_property: Option<&'a str>,
    ) -> BoxFuture<'a, String> {
        Box::pin(async move {
            let remote_id = identity_property
                .and_then(|prop| payload.get(prop))
                .and_then(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .unwrap_or_else(|| {
                    let digest = crate::digest::stable_digest(&Value::Object(payload.clone()));
                    format!("noop-{}", &digest[..16])
                });
            tracing::debug!(
                object_type = %object_type,
                remote_id = %remote_id,
                fields = payload.len(),
                "NoOp: would upsert object"
            );
            Ok(remote_id)
        })
    }

    fn delete<'a>(&'a self, object_type: &'a str, remote_id: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            tracing::debug!(object_type = %object_type, remote_id = %remote_id, "NoOp: would delete object");
            Ok(true)
        })
    }
}
