// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for outbound sync.
//!
//! Errors are categorized by their source (state store, destination, lock
//! cache, declarations) and carry enough context to debug a failed sync.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Store` | Busy/IO only | SQLite errors reading entities or sync state |
//! | `Cache` | Yes | Redis errors on the enqueue dedup lock |
//! | `Destination` | Transport/429 | Destination adapter failures |
//! | `Synchronization` | As wrapped | Deleter failure wrapping a destination error |
//! | `Enqueue` | Yes | Job queue refused or closed |
//! | `Config` | No | Missing declaration, registration, or schema drift |
//! | `RecordNotFound` | No | Entity row vanished before it could be locked |
//! | `Serialize` | No | Serializer rejected the record |
//! | `NotImplemented` | No | Base serializer invoked without a specialization |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Propagation
//!
//! The synchronizer never returns adapter or serializer failures as `Err`: they
//! are persisted into `last_error` and surfaced as
//! [`SyncOutcome::Error`](crate::synchronizer::SyncOutcome). The deleter wraps
//! adapter failures into [`SyncError::Synchronization`] and returns them.

use crate::destination::DestinationError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while detecting staleness or syncing records.
#[derive(Error, Debug)]
pub enum SyncError {
    /// SQLite error reading entity rows or the sync-state table.
    #[error("State store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Redis error on the dedup lock cache.
    #[error("Cache error ({operation}): {message}")]
    Cache {
        operation: String,
        message: String,
        #[source]
        source: Option<redis::RedisError>,
    },

    /// Destination adapter failure.
    #[error("Destination error: {0}")]
    Destination(#[from] DestinationError),

    /// Adapter failure during delete, wrapped for the caller.
    #[error("Synchronization error: {message}")]
    Synchronization {
        message: String,
        #[source]
        source: DestinationError,
    },

    /// Job queue rejected a job.
    #[error("Enqueue error: {0}")]
    Enqueue(String),

    /// Missing declaration, unregistered destination, or schema drift.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The entity row does not exist.
    #[error("Record not found: {entity_type}#{id}")]
    RecordNotFound { entity_type: String, id: i64 },

    /// Serializer rejected the record.
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// A serializer was used without overriding `to_payload`.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Create a cache error from a redis::RedisError
    pub fn cache(operation: impl Into<String>, source: redis::RedisError) -> Self {
        Self::Cache {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a cache error without source
    pub fn cache_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Cache {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a destination failure raised while deleting.
    pub fn synchronization(source: DestinationError) -> Self {
        Self::Synchronization {
            message: source.to_string(),
            source,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => crate::state::is_transient_store_error(e),
            Self::Cache { .. } => true,
            Self::Destination(e) => e.is_retryable(),
            Self::Synchronization { source, .. } => source.is_retryable(),
            Self::Enqueue(_) => true,
            Self::Config(_) => false,
            Self::RecordNotFound { .. } => false,
            Self::Serialize(_) => false,
            Self::NotImplemented(_) => false,
            Self::Internal(_) => false,
        }
    }
}

impl From<redis::RedisError> for SyncError {
    fn from(e: redis::RedisError) -> Self {
        Self::cache("unknown", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::{ApiError, ApiErrorKind};

    #[test]
    fn test_is_retryable_cache() {
        let err = SyncError::cache_msg("SET NX", "connection reset");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("SET NX"));
    }

    #[test]
    fn test_not_retryable_config() {
        let err = SyncError::Config("Company has no binding for crm".to_string());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_not_retryable_record_not_found() {
        let err = SyncError::RecordNotFound {
            entity_type: "Company".to_string(),
            id: 42,
        };
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Record not found: Company#42");
    }

    #[test]
    fn test_store_row_not_found_not_retryable() {
        let err = SyncError::Store(sqlx::Error::RowNotFound);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_store_pool_timeout_retryable() {
        let err = SyncError::Store(sqlx::Error::PoolTimedOut);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_synchronization_keeps_message_and_retryability() {
        let source = DestinationError::Api(ApiError::new(ApiErrorKind::RateLimited, 429, "slow down"));
        let err = SyncError::synchronization(source);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("slow down"));

        let source = DestinationError::Api(ApiError::new(ApiErrorKind::Unauthorized, 401, "bad token"));
        let err = SyncError::synchronization(source);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("bad token"));
    }

    #[test]
    fn test_transport_is_retryable() {
        let err = SyncError::Destination(DestinationError::transport("ConnectError", "refused"));
        assert!(err.is_retryable());
    }
}
