// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Digest-gated push of one entity to one destination.
//!
//! # Flow
//!
//! ```text
//! BEGIN
//!   UPDATE <table> SET <pk> = <pk> WHERE <pk> = ?   ← row lock
//!   reload entity, load or init sync state
//!   payload = serializer(entity)                    ← once
//!   digest  = strategy(payload)                     ← once
//!   digest == last_digest ?  touch last_synced_at   → NotModified
//!                         :  adapter.upsert(...)    → Synced
//!   adapter/serializer failure: last_error only     → Error
//!   save state
//! COMMIT
//! ```
//!
//! Adapter and serializer failures are results, not errors: they are written
//! to `last_error` and returned as [`SyncOutcome::Error`], leaving the remote
//! id, digest and `last_synced_at` of the previous success intact. Missing
//! declarations, store failures and vanished rows are returned as `Err`.

use crate::digest::{DigestStrategy, StableDigest};
use crate::error::{Result, SyncError};
use crate::record::Record;
use crate::registry::{EntityType, Registry, ResolvedBinding};
use crate::sql::quote;
use crate::state::{self, SyncState, SyncStateStore};
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::SqliteConnection;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// Result of one synchronizer call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The payload changed and the destination accepted it.
    Synced { remote_id: Option<String>, digest: String },
    /// The payload digest matched the last push; only the check time moved.
    NotModified,
    /// The serializer or adapter failed; the message is in `last_error`.
    Error { message: String },
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Synced { .. } => "synced",
            Self::NotModified => "not_modified",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Attempt {
    Pushed { remote_id: String, digest: String },
    Unchanged,
}

/// Take the entity row's write lock for the rest of the transaction.
///
/// The lock is a self-assigning `UPDATE` of the primary key, so it fires the
/// table's `UPDATE` triggers. A trigger that touches the modification column
/// must be declared `AFTER UPDATE OF <columns>` without the primary key, or
/// every sync bumps the row and leaves it stale forever.
pub(crate) async fn lock_row(conn: &mut SqliteConnection, entity: &EntityType, id: i64) -> Result<()> {
    let sql = format!(
        "UPDATE {table} SET {pk} = {pk} WHERE {pk} = ?",
        table = quote(&entity.table),
        pk = quote(&entity.primary_key)
    );
    let result = sqlx::query(&sql).bind(id).execute(conn).await?;
    if result.rows_affected() == 0 {
        return Err(SyncError::RecordNotFound {
            entity_type: entity.name.clone(),
            id,
        });
    }
    Ok(())
}

/// Pushes entities to destinations under a row lock.
#[derive(Clone)]
pub struct Synchronizer {
    registry: Arc<Registry>,
    store: SyncStateStore,
    digest: Arc<dyn DigestStrategy>,
}

impl fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer").field("store", &self.store).finish_non_exhaustive()
    }
}

impl Synchronizer {
    /// Synchronizer using [`StableDigest`].
    pub fn new(registry: Arc<Registry>, store: SyncStateStore) -> Self {
        Self::with_digest(registry, store, Arc::new(StableDigest))
    }

    pub fn with_digest(registry: Arc<Registry>, store: SyncStateStore, digest: Arc<dyn DigestStrategy>) -> Self {
        Self { registry, store, digest }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn store(&self) -> &SyncStateStore {
        &self.store
    }

    /// Sync `record` to `destination`. The row is re-read under the lock.
    pub async fn call(&self, record: &Record, destination: &str) -> Result<SyncOutcome> {
        self.sync(&record.entity_type, record.id, destination).await
    }

    /// Sync the entity with primary key `id` to `destination`.
    #[instrument(skip(self))]
    pub async fn sync(&self, entity_type: &str, id: i64, destination: &str) -> Result<SyncOutcome> {
        let start = Instant::now();
        let resolved = self.registry.binding(entity_type, destination)?;
        let entity = resolved.entity;

        let mut tx = self.store.pool().begin().await?;
        lock_row(&mut tx, entity, id).await?;

        let record = Record::load(&mut *tx, entity, id)
            .await?
            .ok_or_else(|| SyncError::RecordNotFound {
                entity_type: entity.name.clone(),
                id,
            })?;
        let mut state = state::find_in(&mut tx, &entity.name, id, destination)
            .await?
            .unwrap_or_else(|| SyncState::new(&entity.name, id, destination));

        let attempt = self.attempt(&resolved, &record, &state).await;
        let now = Utc::now();
        let outcome = match attempt {
            Ok(Attempt::Unchanged) => {
                state.touch(now);
                SyncOutcome::NotModified
            }
            Ok(Attempt::Pushed { remote_id, digest }) => {
                let claimant = if remote_id.trim().is_empty() {
                    None
                } else {
                    state::remote_id_claimant(&mut tx, &remote_id, state.id).await?
                };
                match claimant {
                    Some(claimant) => {
                        let message = format!("Remote id {} is already claimed by {}", remote_id, claimant);
                        state.record_failure(message.clone());
                        SyncOutcome::Error { message }
                    }
                    None => {
                        state.record_success(Some(remote_id), digest.clone(), now);
                        SyncOutcome::Synced {
                            remote_id: state.remote_id.clone(),
                            digest,
                        }
                    }
                }
            }
            Err(message) => {
                state.record_failure(message.clone());
                SyncOutcome::Error { message }
            }
        };

        state::save_in(&mut tx, &mut state, now).await?;
        tx.commit().await?;

        crate::metrics::record_sync_outcome(&entity.name, destination, outcome.as_str(), start.elapsed());
        match &outcome {
            SyncOutcome::Error { message } => {
                warn!(entity_type = %entity.name, id, destination = %destination, error = %message, "Sync failed")
            }
            other => debug!(
                entity_type = %entity.name,
                id,
                destination = %destination,
                outcome = other.as_str(),
                "Sync complete"
            ),
        }
        Ok(outcome)
    }

    async fn attempt(
        &self,
        resolved: &ResolvedBinding<'_>,
        record: &Record,
        state: &SyncState,
    ) -> std::result::Result<Attempt, String> {
        let binding = resolved.binding;
        let payload = binding.serializer.to_payload(record).map_err(|e| e.to_string())?;
        let digest = self.digest.digest(&Value::Object(payload.clone()));

        if state.last_digest.as_deref() == Some(digest.as_str()) {
            return Ok(Attempt::Unchanged);
        }

        let remote_id = resolved
            .adapter()
            .upsert(&binding.object_type, &payload, binding.identity_property.as_deref())
            .await
            .map_err(|e| e.to_string())?;
        Ok(Attempt::Pushed { remote_id, digest })
    }
}
