// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Deduplicated background syncs.
//!
//! ```text
//! schedule(type, id, dest)
//!   └─ acquire outbound_sync:lock:<type>:<id>:<dest> (NX, TTL) ─┬─ held  → Duplicate
//!                                                               └─ taken → enqueue → Enqueued
//! perform(job)
//!   ├─ synchronizer.sync(type, id, dest)
//!   ├─ release lock (always)
//!   └─ retryable failure and attempts left → schedule again after backoff
//! ```
//!
//! Repeat schedules of the same (entity type, id) for one destination are
//! coalesced. Each destination of an entity holds its own lock, since a job
//! syncs exactly one destination and routes to that binding's queue.

mod lock;
mod queue;

pub use lock::{LockCache, MemoryLockCache, RedisLockCache};
pub use queue::{ChannelQueue, JobQueue};

use crate::error::{Result, SyncError};
use crate::resilience::RetryConfig;
use crate::synchronizer::{SyncOutcome, Synchronizer};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

/// Boxed future returned by lock caches and job queues.
pub type JobFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Default dedup lock lifetime.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(15 * 60);

/// One scheduled sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    pub entity_type: String,
    pub id: i64,
    pub destination: String,
    /// 1-based execution attempt.
    pub attempt: usize,
    /// Queue the binding routes to.
    #[serde(default)]
    pub queue: String,
}

impl SyncJob {
    pub fn new(entity_type: impl Into<String>, id: i64, destination: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
            destination: destination.into(),
            attempt: 1,
            queue: String::new(),
        }
    }

    pub fn lock_key(&self) -> String {
        lock_key(&self.entity_type, self.id, &self.destination)
    }
}

/// Dedup lock key for an entity's sync to one destination.
pub fn lock_key(entity_type: &str, id: i64, destination: &str) -> String {
    format!("outbound_sync:lock:{}:{}:{}", entity_type, id, destination)
}

/// Result of a schedule attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Enqueued,
    /// A job for the same entity and destination is already pending; nothing was enqueued.
    Duplicate,
}

/// Result of executing a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(SyncOutcome),
    /// The entity no longer exists.
    Skipped,
    /// Failed transiently; a new attempt was scheduled.
    Retrying { next_attempt: usize, delay: Duration },
}

/// Schedules syncs through a dedup lock and executes them.
pub struct EnqueueGuard {
    synchronizer: Synchronizer,
    lock: Arc<dyn LockCache>,
    queue: Arc<dyn JobQueue>,
    lock_ttl: Duration,
    retry: RetryConfig,
}

impl std::fmt::Debug for EnqueueGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnqueueGuard")
            .field("lock_ttl", &self.lock_ttl)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl EnqueueGuard {
    pub fn new(synchronizer: Synchronizer, lock: Arc<dyn LockCache>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            synchronizer,
            lock,
            queue,
            lock_ttl: DEFAULT_LOCK_TTL,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.synchronizer
    }

    /// Enqueue a sync unless one for the same entity and destination is already pending.
    #[instrument(skip(self))]
    pub async fn schedule(&self, entity_type: &str, id: i64, destination: &str) -> Result<ScheduleOutcome> {
        self.submit(SyncJob::new(entity_type, id, destination), None).await
    }

    async fn submit(&self, mut job: SyncJob, delay: Option<Duration>) -> Result<ScheduleOutcome> {
        let resolved = self
            .synchronizer
            .registry()
            .binding(&job.entity_type, &job.destination)?;
        job.queue = resolved.queue().to_string();

        let key = job.lock_key();
        if !self.lock.acquire(&key, self.lock_ttl).await? {
            debug!(key = %key, destination = %job.destination, "Sync already scheduled, dropping duplicate");
            crate::metrics::record_enqueue(&job.entity_type, "duplicate");
            return Ok(ScheduleOutcome::Duplicate);
        }

        let entity_type = job.entity_type.clone();
        if let Err(e) = self.queue.enqueue(job, delay).await {
            if let Err(release_err) = self.lock.release(&key).await {
                warn!(key = %key, error = %release_err, "Failed to release lock after enqueue failure");
            }
            return Err(e);
        }
        crate::metrics::record_enqueue(&entity_type, "enqueued");
        Ok(ScheduleOutcome::Enqueued)
    }

    /// Execute a job. The dedup lock is released whatever happens.
    ///
    /// Retryable failures re-enter scheduling with backoff while attempts
    /// remain; other failures, and the last retryable one, are returned.
    #[instrument(skip(self, job), fields(entity_type = %job.entity_type, id = job.id, destination = %job.destination, attempt = job.attempt))]
    pub async fn perform(&self, job: SyncJob) -> Result<JobOutcome> {
        let result = self.synchronizer.sync(&job.entity_type, job.id, &job.destination).await;

        let key = job.lock_key();
        if let Err(e) = self.lock.release(&key).await {
            warn!(key = %key, error = %e, "Failed to release dedup lock");
        }

        match result {
            Ok(outcome) => Ok(JobOutcome::Completed(outcome)),
            Err(SyncError::RecordNotFound { .. }) => {
                debug!("Entity no longer exists, skipping");
                Ok(JobOutcome::Skipped)
            }
            Err(e) if e.is_retryable() && self.retry.should_retry(job.attempt) => {
                let delay = self.retry.delay_for_attempt(job.attempt);
                let next = SyncJob {
                    attempt: job.attempt + 1,
                    ..job
                };
                let next_attempt = next.attempt;
                warn!(error = %e, next_attempt, delay_ms = delay.as_millis() as u64, "Sync job failed, retrying");
                crate::metrics::record_job_retry(&next.entity_type, next_attempt);
                self.submit(next, Some(delay)).await?;
                Ok(JobOutcome::Retrying { next_attempt, delay })
            }
            Err(e) => {
                let reason = if e.is_retryable() { "max_attempts" } else { "permanent" };
                warn!(error = %e, reason, "Sync job failed");
                crate::metrics::record_job_dropped(&job.entity_type, reason);
                Err(e)
            }
        }
    }
}

/// Drains a [`ChannelQueue`] into [`EnqueueGuard::perform`].
#[derive(Debug)]
pub struct JobWorker {
    guard: Arc<EnqueueGuard>,
    rx: mpsc::Receiver<SyncJob>,
}

impl JobWorker {
    pub fn new(guard: Arc<EnqueueGuard>, rx: mpsc::Receiver<SyncJob>) -> Self {
        Self { guard, rx }
    }

    /// Run until shutdown is signaled or every sender is gone. Returns jobs performed.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) -> usize {
        let _ = shutdown_rx.borrow_and_update();
        info!("Starting sync job worker");

        let mut performed = 0usize;
        loop {
            let job = tokio::select! {
                biased;

                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping job worker");
                        break;
                    }
                    continue;
                }

                job = self.rx.recv() => match job {
                    Some(job) => job,
                    None => {
                        info!("Job queue closed, stopping job worker");
                        break;
                    }
                },
            };

            performed += 1;
            if let Err(e) = self.guard.perform(job).await {
                debug!(error = %e, "Job finished with error");
            }
        }
        performed
    }
}
