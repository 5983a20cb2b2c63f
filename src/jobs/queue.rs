// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Job submission.

use super::{JobFuture, SyncJob};
use crate::error::{Result, SyncError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Accepts sync jobs for later execution.
pub trait JobQueue: Send + Sync + 'static {
    /// Submit `job`, to run no earlier than `delay` from now.
    fn enqueue<'a>(&'a self, job: SyncJob, delay: Option<Duration>) -> JobFuture<'a, ()>;
}

/// In-process queue over a bounded tokio channel, drained by a
/// [`JobWorker`](super::JobWorker).
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    tx: mpsc::Sender<SyncJob>,
}

impl ChannelQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SyncJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    async fn send(tx: &mpsc::Sender<SyncJob>, job: SyncJob) -> Result<()> {
        tx.send(job)
            .await
            .map_err(|e| SyncError::Enqueue(format!("job queue closed, dropped {}", e.0.lock_key())))
    }
}

impl JobQueue for ChannelQueue {
    fn enqueue<'a>(&'a self, job: SyncJob, delay: Option<Duration>) -> JobFuture<'a, ()> {
        Box::pin(async move {
            if self.tx.is_closed() {
                return Err(SyncError::Enqueue("job queue closed".to_string()));
            }
            match delay.filter(|d| !d.is_zero()) {
                None => Self::send(&self.tx, job).await,
                Some(delay) => {
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Err(e) = Self::send(&tx, job).await {
                            warn!(error = %e, "Delayed job could not be enqueued");
                        }
                    });
                    Ok(())
                }
            }
        })
    }
}
