// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Application-facing facade.
//!
//! [`SyncService`] wires the registry, state store, synchronizer, deleter,
//! staleness finder and (optionally) the enqueue guard together, and exposes
//! the lifecycle hooks an application calls around its own writes.
//!
//! # Boot
//!
//! ```text
//! SyncConfig ──▶ register_http_destinations(registry)
//!            ──▶ SyncService::connect(config, registry)
//!                  ├─ open store, verify schema, migrate
//!                  ├─ lock cache: redis_url ? Redis : in-process
//!                  └─ ChannelQueue + JobWorker (caller spawns run())
//! ```
//!
//! # Hooks
//!
//! | Hook | Effect |
//! |------|--------|
//! | `after_commit(record)` | per binding whose guard admits the record: schedule (or sync inline without a queue) |
//! | `after_destroy(record)` | delete from every destination, then purge the record's sync states |

use crate::batch::BatchDriver;
use crate::config::SyncConfig;
use crate::deleter::{DeleteOutcome, Deleter};
use crate::destination::HttpDestination;
use crate::digest::DigestStrategy;
use crate::error::{Result, SyncError};
use crate::finder::{StaleQueries, StalenessFinder};
use crate::jobs::{ChannelQueue, EnqueueGuard, JobQueue, JobWorker, LockCache, MemoryLockCache, RedisLockCache, ScheduleOutcome};
use crate::record::Record;
use crate::registry::{DestinationOptions, Registry};
use crate::state::SyncStateStore;
use crate::synchronizer::{SyncOutcome, Synchronizer};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// What a change hook did for one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Scheduled(ScheduleOutcome),
    /// No job queue is configured, so the sync ran in the calling task.
    Synced(SyncOutcome),
    /// The binding's guard declined the record.
    Filtered,
}

/// Register an [`HttpDestination`] for every `[destinations.*]` table.
pub fn register_http_destinations(registry: &mut Registry, config: &SyncConfig) -> Result<()> {
    for (name, dest) in &config.destinations {
        let adapter = HttpDestination::new(dest)?;
        registry.register_destination(name.clone(), Arc::new(adapter), DestinationOptions::default())?;
    }
    Ok(())
}

/// Outbound sync entry points for an application.
#[derive(Debug, Clone)]
pub struct SyncService {
    registry: Arc<Registry>,
    store: SyncStateStore,
    synchronizer: Synchronizer,
    deleter: Deleter,
    finder: StalenessFinder,
    guard: Option<Arc<EnqueueGuard>>,
}

impl SyncService {
    /// Service without a job queue: hooks sync inline.
    pub fn new(registry: Arc<Registry>, store: SyncStateStore) -> Self {
        let synchronizer = Synchronizer::new(registry.clone(), store.clone());
        Self::assemble(registry, store, synchronizer)
    }

    pub fn with_digest(registry: Arc<Registry>, store: SyncStateStore, digest: Arc<dyn DigestStrategy>) -> Self {
        let synchronizer = Synchronizer::with_digest(registry.clone(), store.clone(), digest);
        Self::assemble(registry, store, synchronizer)
    }

    fn assemble(registry: Arc<Registry>, store: SyncStateStore, synchronizer: Synchronizer) -> Self {
        Self {
            deleter: Deleter::new(registry.clone(), store.clone()),
            finder: StalenessFinder::new(registry.clone(), store.pool().clone()),
            registry,
            store,
            synchronizer,
            guard: None,
        }
    }

    /// Route hooks and `sync_later` through a dedup guard built on this
    /// service's synchronizer.
    pub fn with_enqueue(
        mut self,
        lock: Arc<dyn LockCache>,
        queue: Arc<dyn JobQueue>,
        settings: &crate::config::JobSettings,
    ) -> Self {
        let guard = EnqueueGuard::new(self.synchronizer.clone(), lock, queue)
            .with_lock_ttl(settings.lock_ttl())
            .with_retry(settings.retry());
        self.guard = Some(Arc::new(guard));
        self
    }

    /// Boot from configuration. The returned worker must be spawned by the caller.
    pub async fn connect(config: &SyncConfig, registry: Arc<Registry>) -> Result<(Self, JobWorker)> {
        config.validate()?;
        let store = SyncStateStore::connect(&config.store.sqlite_path, config.store.max_connections).await?;
        store.verify_schema().await?;
        store.migrate().await?;

        let lock: Arc<dyn LockCache> = match config.jobs.redis_url.as_deref() {
            Some(url) => Arc::new(RedisLockCache::connect(url).await?),
            None => Arc::new(MemoryLockCache::new()),
        };
        let (queue, rx) = ChannelQueue::new(config.jobs.queue_capacity);

        let service = Self::new(registry, store).with_enqueue(lock, Arc::new(queue), &config.jobs);
        let guard = service
            .guard
            .clone()
            .ok_or_else(|| SyncError::Internal("enqueue guard missing after setup".to_string()))?;
        info!(
            entity_types = service.registry.sync_capable().count(),
            shared_lock = config.jobs.redis_url.is_some(),
            "Outbound sync ready"
        );
        Ok((service, JobWorker::new(guard, rx)))
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn store(&self) -> &SyncStateStore {
        &self.store
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.synchronizer
    }

    pub fn enqueue_guard(&self) -> Option<&Arc<EnqueueGuard>> {
        self.guard.as_ref()
    }

    /// Batch driver over this service's finder, enqueue-capable when a guard is set.
    pub fn batch_driver(&self) -> BatchDriver {
        let driver = BatchDriver::new(self.finder.clone(), self.synchronizer.clone());
        match &self.guard {
            Some(guard) => driver.with_enqueue(guard.clone()),
            None => driver,
        }
    }

    pub async fn sync(&self, record: &Record, destination: &str) -> Result<SyncOutcome> {
        self.synchronizer.call(record, destination).await
    }

    pub async fn delete(&self, record: &Record, destination: &str) -> Result<DeleteOutcome> {
        self.deleter.call(record, destination).await
    }

    /// Schedule a background sync. `None` when the binding's guard declines.
    pub async fn sync_later(&self, record: &Record, destination: &str) -> Result<Option<ScheduleOutcome>> {
        let guard = self
            .guard
            .as_deref()
            .ok_or_else(|| SyncError::Config("sync_later requires a job queue".to_string()))?;
        let resolved = self.registry.binding(&record.entity_type, destination)?;
        if !resolved.binding.allows(record) {
            return Ok(None);
        }
        guard.schedule(&record.entity_type, record.id, destination).await.map(Some)
    }

    /// Hook for after the record's transaction commits.
    #[instrument(skip(self, record), fields(entity_type = %record.entity_type, id = record.id))]
    pub async fn after_commit(&self, record: &Record) -> Result<Vec<(String, HookOutcome)>> {
        let entity = self.registry.require_entity(&record.entity_type)?;
        let mut outcomes = Vec::new();
        for destination in entity.destinations() {
            let resolved = self.registry.binding(&entity.name, destination)?;
            let outcome = if !resolved.binding.allows(record) {
                debug!(destination = %destination, "Guard declined record");
                HookOutcome::Filtered
            } else {
                match &self.guard {
                    Some(guard) => HookOutcome::Scheduled(guard.schedule(&entity.name, record.id, destination).await?),
                    None => HookOutcome::Synced(self.synchronizer.call(record, destination).await?),
                }
            };
            outcomes.push((destination.to_string(), outcome));
        }
        Ok(outcomes)
    }

    /// Hook for after the record is destroyed.
    ///
    /// Destinations are deleted from concurrently. Any failure aborts before
    /// the purge, so the remote ids survive for another attempt.
    #[instrument(skip(self, record), fields(entity_type = %record.entity_type, id = record.id))]
    pub async fn after_destroy(&self, record: &Record) -> Result<Vec<(String, DeleteOutcome)>> {
        let entity = self.registry.require_entity(&record.entity_type)?;
        let deletes = entity.destinations().map(|destination| async move {
            let outcome = self.deleter.delete(&entity.name, record.id, destination).await?;
            Ok::<_, SyncError>((destination.to_string(), outcome))
        });
        let outcomes = join_all(deletes).await.into_iter().collect::<Result<Vec<_>>>()?;
        let purged = self.store.purge_resource(&entity.name, record.id).await?;
        debug!(purged, "Purged sync states");
        Ok(outcomes)
    }

    /// Staleness queries, optionally filtered.
    pub async fn find_stale(&self, entity_types: Option<&[&str]>, destination: Option<&str>) -> Result<StaleQueries> {
        self.finder.find(entity_types, destination).await
    }
}
