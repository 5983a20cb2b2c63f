//! Mock destination for testing.
//!
//! Records all calls to upsert() and delete() for assertions.
//! Failures can be toggled at any point to exercise error paths.

use outbound_sync::destination::{ApiError, ApiErrorKind, BoxFuture, Destination, DestinationError};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// A recorded upsert() call.
#[derive(Debug, Clone)]
pub struct UpsertCall {
    pub object_type: String,
    pub payload: Map<String, Value>,
    pub identity_property: Option<String>,
    /// Remote id handed back.
    pub remote_id: String,
}

/// A recorded delete() call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteCall {
    pub object_type: String,
    pub remote_id: String,
}

/// Destination that records every call.
///
/// Remote ids are `<object_type>-<n>` with `n` counting upserts from 1, so
/// every push of a new object gets a fresh id.
///
/// # Example
/// ```rust,ignore
/// let mock = Arc::new(MockDestination::new());
/// registry.register_destination("crm", mock.clone(), DestinationOptions::default())?;
///
/// // ... run syncs ...
///
/// assert_eq!(mock.upserts().len(), 5);
/// ```
#[derive(Default)]
pub struct MockDestination {
    upserts: Mutex<Vec<UpsertCall>>,
    deletes: Mutex<Vec<DeleteCall>>,
    counter: AtomicUsize,
    fail: AtomicBool,
}

impl MockDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail with a 500.
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn upserts(&self) -> Vec<UpsertCall> {
        self.upserts.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<DeleteCall> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.upserts.lock().unwrap().clear();
        self.deletes.lock().unwrap().clear();
    }

    fn failure() -> DestinationError {
        DestinationError::Api(ApiError::new(ApiErrorKind::Other, 500, "mock destination failure"))
    }
}

impl Destination for MockDestination {
    fn upsert<'a>(
        &'a self,
        object_type: &'a str,
        payload: &'a Map<String, Value>,
        identity_property: Option<&'a str>,
    ) -> BoxFuture<'a, String> {
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Self::failure());
            }
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            let remote_id = format!("{}-{}", object_type, n);
            self.upserts.lock().unwrap().push(UpsertCall {
                object_type: object_type.to_string(),
                payload: payload.clone(),
                identity_property: identity_property.map(str::to_string),
                remote_id: remote_id.clone(),
            });
            Ok(remote_id)
        })
    }

    fn delete<'a>(&'a self, object_type: &'a str, remote_id: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Self::failure());
            }
            self.deletes.lock().unwrap().push(DeleteCall {
                object_type: object_type.to_string(),
                remote_id: remote_id.to_string(),
            });
            Ok(true)
        })
    }
}
