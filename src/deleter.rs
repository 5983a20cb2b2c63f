// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote deletion of one entity from one destination.
//!
//! Unlike the synchronizer, adapter failures propagate: they are wrapped in
//! [`SyncError::Synchronization`] and returned. The sync-state row is left as
//! it is; the owner's destroy lifecycle purges it.

use crate::error::{Result, SyncError};
use crate::record::Record;
use crate::registry::Registry;
use crate::state::SyncStateStore;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Result of one deleter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The adapter was called; `confirmed` is its answer.
    Deleted { confirmed: bool },
    /// Nothing was ever pushed, so nothing was deleted.
    Noop,
}

impl DeleteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deleted { .. } => "deleted",
            Self::Noop => "noop",
        }
    }
}

impl fmt::Display for DeleteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deletes remote objects recorded in sync state.
#[derive(Debug, Clone)]
pub struct Deleter {
    registry: Arc<Registry>,
    store: SyncStateStore,
}

impl Deleter {
    pub fn new(registry: Arc<Registry>, store: SyncStateStore) -> Self {
        Self { registry, store }
    }

    pub async fn call(&self, record: &Record, destination: &str) -> Result<DeleteOutcome> {
        self.delete(&record.entity_type, record.id, destination).await
    }

    /// Delete the remote object of entity `id`. The entity row need not exist.
    #[instrument(skip(self))]
    pub async fn delete(&self, entity_type: &str, id: i64, destination: &str) -> Result<DeleteOutcome> {
        let resolved = self.registry.binding(entity_type, destination)?;

        let state = self.store.find(&resolved.entity.name, id, destination).await?;
        let Some(remote_id) = state.as_ref().and_then(|s| s.remote()) else {
            debug!(entity_type = %entity_type, id, destination = %destination, "No remote id, nothing to delete");
            crate::metrics::record_delete(entity_type, destination, DeleteOutcome::Noop.as_str());
            return Ok(DeleteOutcome::Noop);
        };

        let confirmed = match resolved.adapter().delete(&resolved.binding.object_type, remote_id).await {
            Ok(confirmed) => confirmed,
            Err(e) => {
                warn!(
                    entity_type = %entity_type,
                    id,
                    destination = %destination,
                    remote_id = %remote_id,
                    error = %e,
                    "Remote delete failed"
                );
                crate::metrics::record_delete(entity_type, destination, "error");
                return Err(SyncError::synchronization(e));
            }
        };

        let outcome = DeleteOutcome::Deleted { confirmed };
        crate::metrics::record_delete(entity_type, destination, outcome.as_str());
        debug!(
            entity_type = %entity_type,
            id,
            destination = %destination,
            remote_id = %remote_id,
            confirmed,
            "Remote object deleted"
        );
        Ok(outcome)
    }
}
