//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Sync and delete outcomes per entity type and destination
//! - Batch driver and sweep throughput
//! - Enqueue deduplication and job retries
//! - Destination request latency
//! - State store busy retries
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `outbound_sync_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Histograms track distributions (duration, size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use outbound_sync::metrics;
//! use std::time::Duration;
//!
//! metrics::record_sync_outcome("Company", "crm", "synced", Duration::from_millis(120));
//! metrics::record_enqueue("Company", "duplicate");
//! ```

use metrics::{counter, histogram};
use std::time::Duration;

// =============================================================================
// Synchronizer / Deleter
// =============================================================================

/// Record one synchronizer call.
pub fn record_sync_outcome(entity_type: &str, destination: &str, outcome: &str, duration: Duration) {
    counter!(
        "outbound_sync_syncs_total",
        "entity_type" => entity_type.to_string(),
        "destination" => destination.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!(
        "outbound_sync_sync_duration_seconds",
        "entity_type" => entity_type.to_string(),
        "destination" => destination.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record one deleter call (`deleted`, `noop`, or `error`).
pub fn record_delete(entity_type: &str, destination: &str, outcome: &str) {
    counter!(
        "outbound_sync_deletes_total",
        "entity_type" => entity_type.to_string(),
        "destination" => destination.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// =============================================================================
// Destination
// =============================================================================

/// Record one destination HTTP request.
pub fn record_destination_request(operation: &str, status: &str, duration: Duration) {
    counter!(
        "outbound_sync_destination_requests_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("outbound_sync_destination_request_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());
}

// =============================================================================
// Batch / Sweep
// =============================================================================

/// Record a batch driver run.
pub fn record_batch_run(mode: &str, total: usize, errors: usize, duration: Duration) {
    counter!("outbound_sync_batch_processed_total", "mode" => mode.to_string()).increment(total as u64);
    if errors > 0 {
        counter!("outbound_sync_batch_errors_total", "mode" => mode.to_string()).increment(errors as u64);
    }
    histogram!("outbound_sync_batch_duration_seconds", "mode" => mode.to_string())
        .record(duration.as_secs_f64());
}

/// Record one page fetched from a staleness query.
pub fn record_batch_page(entity_type: &str, size: usize) {
    histogram!("outbound_sync_batch_page_size", "entity_type" => entity_type.to_string()).record(size as f64);
}

/// Record a completed sweep cycle.
pub fn record_sweep_cycle(total: usize, errors: usize, duration: Duration) {
    counter!("outbound_sync_sweep_cycles_total", "status" => "completed").increment(1);
    counter!("outbound_sync_sweep_processed_total").increment(total as u64);
    if errors > 0 {
        counter!("outbound_sync_sweep_errors_total").increment(errors as u64);
    }
    histogram!("outbound_sync_sweep_duration_seconds").record(duration.as_secs_f64());
}

/// Record a sweep cycle that failed before finishing.
pub fn record_sweep_failed() {
    counter!("outbound_sync_sweep_cycles_total", "status" => "failed").increment(1);
}

// =============================================================================
// Jobs
// =============================================================================

/// Record a schedule attempt (`enqueued` or `duplicate`).
pub fn record_enqueue(entity_type: &str, outcome: &str) {
    counter!(
        "outbound_sync_enqueue_total",
        "entity_type" => entity_type.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a job re-scheduled after a retryable failure.
pub fn record_job_retry(entity_type: &str, attempt: usize) {
    counter!("outbound_sync_job_retries_total", "entity_type" => entity_type.to_string()).increment(1);
    histogram!("outbound_sync_job_retry_attempt", "entity_type" => entity_type.to_string()).record(attempt as f64);
}

/// Record a job given up on.
pub fn record_job_dropped(entity_type: &str, reason: &str) {
    counter!(
        "outbound_sync_jobs_dropped_total",
        "entity_type" => entity_type.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

// =============================================================================
// State store
// =============================================================================

/// Increment the SQLite busy retry counter.
pub fn store_retries_total(operation: &str) {
    counter!("outbound_sync_store_retries_total", "operation" => operation.to_string()).increment(1);
}
