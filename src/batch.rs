//! Batch driver for stale entities.
//!
//! Walks every staleness query page by page and either syncs each key inline
//! or schedules it through the [`EnqueueGuard`].
//!
//! # Design
//!
//! ```text
//! StalenessFinder ──▶ {type → {destination → StaleQuery}}
//!                                   │
//!                                   ▼  keyset pages of page_size (id > last)
//!                     ┌─────────────┴─────────────┐
//!                     ▼                           ▼
//!              Inline: Synchronizer        Enqueue: EnqueueGuard::schedule
//!              (errors counted,            (counted on submission,
//!               batch continues)            pending duplicates apart,
//!                                           schedule errors abort)
//! ```
//!
//! Paging is by primary key, so entities leaving the stale set while the batch
//! runs never shift a page and every key is visited at most once.

use crate::error::{Result, SyncError};
use crate::finder::StalenessFinder;
use crate::jobs::{EnqueueGuard, ScheduleOutcome};
use crate::synchronizer::Synchronizer;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// How stale keys are processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    /// Load and sync each entity in the calling task.
    #[default]
    Inline,
    /// Schedule each key through the dedup guard without loading it.
    Enqueue,
}

impl BatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Enqueue => "enqueue",
        }
    }
}

/// Selection and paging for one batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Restrict to these entity types (default: every sync-capable type).
    pub entity_types: Option<Vec<String>>,
    /// Restrict to one destination.
    pub destination: Option<String>,
    pub mode: BatchMode,
    /// Primary keys fetched per page.
    pub page_size: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            entity_types: None,
            destination: None,
            mode: BatchMode::Inline,
            page_size: 100,
        }
    }
}

impl BatchOptions {
    pub fn from_settings(settings: &crate::config::BatchSettings) -> Self {
        Self {
            mode: if settings.enqueue {
                BatchMode::Enqueue
            } else {
                BatchMode::Inline
            },
            page_size: settings.page_size,
            ..Self::default()
        }
    }

    pub fn entity_types<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entity_types = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn mode(mut self, mode: BatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

/// Aggregated counts from a batch run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchStats {
    /// Keys processed (inline) or submitted (enqueue) across all pairs.
    pub total: usize,
    /// `total` broken down by entity type.
    pub per_entity_type: BTreeMap<String, usize>,
    /// Inline syncs that failed or returned an error outcome.
    pub errors: usize,
    /// Enqueue mode keys already pending under the dedup lock. Not in `total`.
    pub duplicates: usize,
}

/// Pages through stale entities and syncs or schedules them.
#[derive(Debug, Clone)]
pub struct BatchDriver {
    finder: StalenessFinder,
    synchronizer: Synchronizer,
    guard: Option<Arc<EnqueueGuard>>,
}

impl BatchDriver {
    pub fn new(finder: StalenessFinder, synchronizer: Synchronizer) -> Self {
        Self {
            finder,
            synchronizer,
            guard: None,
        }
    }

    /// Enable [`BatchMode::Enqueue`].
    pub fn with_enqueue(mut self, guard: Arc<EnqueueGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    #[instrument(skip(self))]
    pub async fn run(&self, options: &BatchOptions) -> Result<BatchStats> {
        if options.page_size == 0 {
            return Err(SyncError::Config("batch page size must be > 0".to_string()));
        }
        let guard = match options.mode {
            BatchMode::Enqueue => Some(self.guard.as_deref().ok_or_else(|| {
                SyncError::Config("enqueue mode requires a job queue".to_string())
            })?),
            BatchMode::Inline => None,
        };

        let start = Instant::now();
        let filter: Option<Vec<&str>> = options
            .entity_types
            .as_ref()
            .map(|names| names.iter().map(String::as_str).collect());
        let queries = self
            .finder
            .find(filter.as_deref(), options.destination.as_deref())
            .await?;

        let pool = self.synchronizer.store().pool();
        let mut stats = BatchStats::default();

        for (entity_type, per_destination) in &queries {
            for (destination, query) in per_destination {
                let mut after = None;
                loop {
                    let page = query.fetch_page(pool, after, options.page_size).await?;
                    let Some(&last) = page.last() else { break };
                    crate::metrics::record_batch_page(entity_type, page.len());
                    debug!(
                        entity_type = %entity_type,
                        destination = %destination,
                        size = page.len(),
                        after = ?after,
                        "Processing stale page"
                    );

                    for &id in &page {
                        let counted = match guard {
                            Some(guard) => match guard.schedule(entity_type, id, destination).await {
                                Ok(ScheduleOutcome::Enqueued) => true,
                                Ok(ScheduleOutcome::Duplicate) => {
                                    stats.duplicates += 1;
                                    false
                                }
                                Err(e) => {
                                    error!(
                                        entity_type = %entity_type,
                                        id,
                                        destination = %destination,
                                        error = %e,
                                        "Failed to schedule sync"
                                    );
                                    return Err(e);
                                }
                            },
                            None => self.sync_one(entity_type, id, destination, &mut stats).await,
                        };
                        if counted {
                            stats.total += 1;
                            *stats.per_entity_type.entry(entity_type.clone()).or_insert(0) += 1;
                        }
                    }

                    if page.len() < options.page_size {
                        break;
                    }
                    after = Some(last);
                }
            }
        }

        crate::metrics::record_batch_run(options.mode.as_str(), stats.total, stats.errors, start.elapsed());
        info!(
            mode = options.mode.as_str(),
            total = stats.total,
            errors = stats.errors,
            duplicates = stats.duplicates,
            duration_ms = start.elapsed().as_millis() as u64,
            "Batch complete"
        );
        Ok(stats)
    }

    /// Sync one key, counting failures. Returns whether the key was processed.
    async fn sync_one(&self, entity_type: &str, id: i64, destination: &str, stats: &mut BatchStats) -> bool {
        match self.synchronizer.sync(entity_type, id, destination).await {
            Ok(outcome) => {
                if outcome.is_error() {
                    stats.errors += 1;
                }
                true
            }
            Err(SyncError::RecordNotFound { .. }) => {
                debug!(entity_type = %entity_type, id, "Entity vanished during batch, skipping");
                false
            }
            Err(e) => {
                warn!(
                    entity_type = %entity_type,
                    id,
                    destination = %destination,
                    error = %e,
                    "Sync failed during batch"
                );
                stats.errors += 1;
                true
            }
        }
    }
}
