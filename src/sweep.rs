// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Periodic staleness sweep.
//!
//! Runs the batch driver on a fixed interval so changes that never went
//! through a change hook (bulk SQL updates, dependency edits, failed syncs)
//! still converge. Missed ticks are skipped rather than bursted.

use crate::batch::{BatchDriver, BatchOptions};
use crate::config::SweepConfig;
use crate::metrics;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{info, warn, Instrument};

/// Run the sweep until shutdown is signaled. Returns completed cycles.
pub async fn run_sweep(
    driver: BatchDriver,
    options: BatchOptions,
    config: SweepConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> usize {
    let span = tracing::info_span!("sweep");

    async move {
        // Mark initial shutdown value as seen so changed() only fires on actual changes
        let _ = shutdown_rx.borrow_and_update();

        let interval = config.interval();
        info!(
            interval_secs = interval.as_secs(),
            mode = options.mode.as_str(),
            page_size = options.page_size,
            "Starting staleness sweep"
        );

        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut cycles = 0usize;
        loop {
            tokio::select! {
                biased;

                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping sweep");
                        break;
                    }
                    continue;
                }

                _ = timer.tick() => {}
            }

            let cycle_start = Instant::now();
            match driver.run(&options).await {
                Ok(stats) => {
                    cycles += 1;
                    metrics::record_sweep_cycle(stats.total, stats.errors, cycle_start.elapsed());
                    if stats.total > 0 {
                        info!(total = stats.total, errors = stats.errors, "Sweep cycle complete");
                    }
                }
                Err(e) => {
                    metrics::record_sweep_failed();
                    warn!(error = %e, "Sweep cycle failed");
                }
            }
        }
        cycles
    }
    .instrument(span)
    .await
}
