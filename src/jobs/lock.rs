// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! TTL-bounded dedup locks.
//!
//! The lock only prevents redundant scheduling. Execution is still serialized
//! by the synchronizer's row lock.

use super::JobFuture;
use crate::error::{Result, SyncError};
use redis::aio::ConnectionManager;
use redis::Client;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Atomic set-if-absent with expiry, shared by every scheduler.
pub trait LockCache: Send + Sync + 'static {
    /// Take `key` for `ttl`. `false` when someone already holds it.
    fn acquire<'a>(&'a self, key: &'a str, ttl: Duration) -> JobFuture<'a, bool>;

    /// Drop `key`, whoever holds it.
    fn release<'a>(&'a self, key: &'a str) -> JobFuture<'a, ()>;
}

// =============================================================================
// Redis
// =============================================================================

/// Lock cache on Redis (`SET key 1 NX PX ttl` / `DEL key`).
#[derive(Clone)]
pub struct RedisLockCache {
    /// ConnectionManager is Clone and multiplexed, so sharing is cheap.
    conn: ConnectionManager,
}

impl RedisLockCache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| SyncError::cache("connect", e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| SyncError::cache("connect", e))?;
        info!(url = %url, "Connected dedup lock cache");
        Ok(Self { conn })
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

impl LockCache for RedisLockCache {
    fn acquire<'a>(&'a self, key: &'a str, ttl: Duration) -> JobFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(1)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await
                .map_err(|e| SyncError::cache("lock_acquire", e))?;
            Ok(reply.is_some())
        })
    }

    fn release<'a>(&'a self, key: &'a str) -> JobFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let removed: i64 = redis::cmd("DEL")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(|e| SyncError::cache("lock_release", e))?;
            debug!(key = %key, removed, "Released dedup lock");
            Ok(())
        })
    }
}

// =============================================================================
// In-process
// =============================================================================

/// Process-local lock cache honouring TTLs. For single-process deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryLockCache {
    held: Mutex<HashMap<String, Instant>>,
}

impl MemoryLockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is held and unexpired.
    pub fn is_held(&self, key: &str) -> bool {
        let now = Instant::now();
        self.held
            .lock()
            .map(|held| held.get(key).is_some_and(|expires| *expires > now))
            .unwrap_or(false)
    }
}

impl LockCache for MemoryLockCache {
    fn acquire<'a>(&'a self, key: &'a str, ttl: Duration) -> JobFuture<'a, bool> {
        Box::pin(async move {
            let now = Instant::now();
            let mut held = self
                .held
                .lock()
                .map_err(|_| SyncError::cache_msg("lock_acquire", "lock table poisoned"))?;
            held.retain(|_, expires| *expires > now);
            if held.contains_key(key) {
                return Ok(false);
            }
            held.insert(key.to_string(), now + ttl);
            Ok(true)
        })
    }

    fn release<'a>(&'a self, key: &'a str) -> JobFuture<'a, ()> {
        Box::pin(async move {
            self.held
                .lock()
                .map_err(|_| SyncError::cache_msg("lock_release", "lock table poisoned"))?
                .remove(key);
            Ok(())
        })
    }
}
