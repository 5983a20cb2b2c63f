// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience utilities: job retry backoff and destination rate limiting.
//!
//! - [`RetryConfig`]: bounded attempts with exponential backoff for sync jobs
//! - [`RateLimiter`]: token bucket in front of a destination API
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() {
//! use outbound_sync::resilience::{RateLimiter, RateLimitConfig, RetryConfig};
//!
//! // Destination allows ~10 requests/sec with bursts of 10
//! let limiter = RateLimiter::new(RateLimitConfig::default());
//! limiter.acquire().await;
//!
//! let retry = RetryConfig::default();
//! let wait = retry.delay_for_attempt(2);
//! # let _ = wait;
//! # }
//! ```

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovLimiter,
};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;

/// Retry policy for sync job execution.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: usize,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Ceiling for exponential backoff.
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each retry).
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    /// Five attempts: 30s, 60s, 120s, 240s between them.
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(600),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Wait before re-running a job whose attempt number `attempt` failed.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Whether another attempt is allowed after `attempt` attempts.
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

// =============================================================================
// Rate Limiting
// =============================================================================

/// Configuration for rate limiting.
///
/// Uses a token bucket algorithm: tokens refill at `refill_rate` per second,
/// up to `burst_size` tokens. Each request consumes one token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum tokens that can be accumulated (burst capacity).
    pub burst_size: u32,

    /// Tokens added per second (sustained rate).
    pub refill_rate: u32,
}

impl Default for RateLimitConfig {
    /// Default: 10 req/sec with burst of 10, matching common CRM API quotas.
    fn default() -> Self {
        Self {
            burst_size: 10,
            refill_rate: 10,
        }
    }
}

impl RateLimitConfig {
    /// No rate limiting (unlimited).
    pub fn unlimited() -> Self {
        Self {
            burst_size: u32::MAX,
            refill_rate: u32::MAX,
        }
    }
}

/// Token bucket rate limiter.
pub struct RateLimiter {
    limiter: GovLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(config.refill_rate).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        Self {
            limiter: GovLimiter::direct(quota),
        }
    }

    /// Acquire a permit, waiting until one is available.
    ///
    /// This method is cancel-safe.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Try to acquire a permit without blocking.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}
