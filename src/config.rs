// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for outbound sync.
//!
//! Configuration can be constructed programmatically or parsed from TOML.
//! Entity declarations and destination adapters are code, not configuration:
//! they live in the [`Registry`](crate::registry::Registry).
//!
//! # Quick Start
//!
//! ```rust
//! use outbound_sync::config::SyncConfig;
//!
//! let config = SyncConfig {
//!     ..SyncConfig::for_testing()
//! };
//! assert_eq!(config.batch.page_size, 100);
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! SyncConfig
//! ├── store: StoreConfig            # SQLite state store
//! ├── batch: BatchSettings          # Batch driver paging
//! ├── jobs: JobSettings             # Dedup lock + retry policy
//! ├── sweep: SweepConfig            # Periodic staleness sweep
//! └── destinations: {name → HttpDestinationConfig}
//! ```
//!
//! # TOML Example
//!
//! ```toml
//! [store]
//! sqlite_path = "/var/lib/app/app.db"
//!
//! [batch]
//! page_size = 500
//!
//! [jobs]
//! redis_url = "redis://cache:6379"
//! lock_ttl_sec = 900
//!
//! [sweep]
//! enabled = true
//! interval_sec = 300
//!
//! [destinations.crm]
//! base_url = "https://api.example-crm.com"
//! timeout_ms = 10000
//! ```

use crate::error::{Result, SyncError};
use crate::resilience::{RateLimitConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub batch: BatchSettings,

    #[serde(default)]
    pub jobs: JobSettings,

    #[serde(default)]
    pub sweep: SweepConfig,

    /// HTTP destinations keyed by destination name.
    #[serde(default)]
    pub destinations: BTreeMap<String, HttpDestinationConfig>,
}

impl SyncConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| SyncError::Config(format!("Invalid TOML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Minimal config for tests: no redis, fast retries, in-process lock.
    pub fn for_testing() -> Self {
        Self {
            store: StoreConfig::default(),
            batch: BatchSettings::default(),
            jobs: JobSettings {
                redis_url: None,
                lock_ttl_sec: 60,
                max_attempts: 3,
                initial_backoff_ms: 10,
                max_backoff_ms: 100,
                queue_capacity: 64,
            },
            sweep: SweepConfig {
                enabled: false,
                interval_sec: 1,
            },
            destinations: BTreeMap::new(),
        }
    }

    /// Reject values that would make the engine misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.batch.page_size == 0 {
            return Err(SyncError::Config("batch.page_size must be > 0".to_string()));
        }
        if self.jobs.lock_ttl_sec == 0 {
            return Err(SyncError::Config("jobs.lock_ttl_sec must be > 0".to_string()));
        }
        if self.jobs.max_attempts == 0 {
            return Err(SyncError::Config("jobs.max_attempts must be > 0".to_string()));
        }
        if self.sweep.enabled && self.sweep.interval_sec == 0 {
            return Err(SyncError::Config("sweep.interval_sec must be > 0".to_string()));
        }
        for (name, dest) in &self.destinations {
            if dest.base_url.trim().is_empty() {
                return Err(SyncError::Config(format!("destinations.{}.base_url is empty", name)));
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store
// ═══════════════════════════════════════════════════════════════════════════════

/// SQLite connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the application database holding entity tables and `sync_states`.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_sqlite_path() -> String {
    "outbound_sync.db".to_string()
}

fn default_max_connections() -> u32 {
    4
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            max_connections: default_max_connections(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Batch
// ═══════════════════════════════════════════════════════════════════════════════

/// Batch driver defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Primary keys fetched per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Enqueue jobs instead of syncing inline.
    #[serde(default)]
    pub enqueue: bool,
}

fn default_page_size() -> usize {
    100
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            enqueue: false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Jobs
// ═══════════════════════════════════════════════════════════════════════════════

/// Enqueue dedup lock and job retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSettings {
    /// Redis URL for the shared dedup lock. `None` uses a process-local lock.
    #[serde(default)]
    pub redis_url: Option<String>,

    #[serde(default = "default_lock_ttl_sec")]
    pub lock_ttl_sec: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Capacity of the in-process job channel.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_lock_ttl_sec() -> u64 {
    900 // 15 minutes
}

fn default_max_attempts() -> usize {
    5
}

fn default_initial_backoff_ms() -> u64 {
    30_000
}

fn default_max_backoff_ms() -> u64 {
    600_000
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            lock_ttl_sec: default_lock_ttl_sec(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl JobSettings {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_sec)
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
            backoff_factor: 2.0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sweep
// ═══════════════════════════════════════════════════════════════════════════════

/// Periodic staleness sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_sweep_interval_sec")]
    pub interval_sec: u64,
}

fn default_sweep_interval_sec() -> u64 {
    300
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_sec: default_sweep_interval_sec(),
        }
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_sec.max(1))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Destinations
// ═══════════════════════════════════════════════════════════════════════════════

/// Settings for [`HttpDestination`](crate::destination::http::HttpDestination).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpDestinationConfig {
    pub base_url: String,

    /// Bearer token. Prefer injecting from the environment over committing it.
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for HttpDestinationConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            access_token: None,
            timeout_ms: default_timeout_ms(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}
