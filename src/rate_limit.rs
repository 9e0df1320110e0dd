//! Per-source token-bucket rate limiting for polite scraping.
//!
//! Each source gets an independent bucket with capacity `max_requests`,
//! refilled continuously at `max_requests / time_window` tokens per second
//! (not in fixed-interval chunks). [`RateLimiter::acquire`] suspends the
//! caller until a token is available; independent sources never wait on
//! each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{self, Instant};

use crate::error::ConfigError;

/// Configuration for the per-source rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Bucket capacity: burst size allowed against a cold source.
    pub max_requests: u32,

    /// Window over which `max_requests` are spread for the refill rate.
    pub time_window: Duration,

    /// Scales waits for buckets under sustained contention. 1.0 disables.
    ///
    /// When a caller loops back after a wait and still finds the bucket
    /// empty, the next computed wait is multiplied by this factor for each
    /// consecutive miss, easing pressure on a hot source.
    pub backoff_factor: f64,

    /// Maximum total time one `acquire` call may spend waiting before
    /// failing with [`RateLimitTimeout`]. `None` waits indefinitely.
    pub max_wait: Option<Duration>,
}

impl Default for RateLimiterConfig {
    /// 10 requests per minute, no contention backoff, unbounded wait.
    fn default() -> Self {
        Self {
            max_requests: 10,
            time_window: Duration::from_secs(60),
            backoff_factor: 1.0,
            max_wait: None,
        }
    }
}

impl RateLimiterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests == 0 {
            return Err(ConfigError("max_requests must be > 0".into()));
        }
        if self.time_window.is_zero() {
            return Err(ConfigError("time_window must be > 0".into()));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError("backoff_factor must be >= 1.0".into()));
        }
        if let Some(max_wait) = self.max_wait
            && max_wait.is_zero()
        {
            return Err(ConfigError("max_wait must be > 0 when set".into()));
        }
        Ok(())
    }

    fn refill_rate(&self) -> f64 {
        f64::from(self.max_requests) / self.time_window.as_secs_f64()
    }
}

/// The configured wait budget was exceeded before a token became available.
#[derive(Debug, thiserror::Error)]
#[error(
    "rate limiter timed out for '{source_id}': needed {}ms, budget {}ms",
    .needed.as_millis(),
    .max_wait.as_millis()
)]
pub struct RateLimitTimeout {
    pub source_id: String,
    pub needed: Duration,
    pub max_wait: Duration,
}

/// Per-source bucket state.
#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    /// Consecutive times an acquirer looped back and still found no token.
    consecutive_waits: u32,
}

/// Token-bucket rate limiter keyed by source id.
///
/// Thread-safe: concurrent acquirers on the same source serialise token
/// consumption through the bucket map mutex; the lock is dropped while
/// sleeping so other sources aren't blocked.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Wait until a token is available for `source_id`, then consume it.
    ///
    /// Returns `Err(RateLimitTimeout)` only when a `max_wait` budget is
    /// configured and the projected wait exceeds it; plain waiting is not
    /// an error.
    pub async fn acquire(&self, source_id: &str) -> Result<(), RateLimitTimeout> {
        let capacity = f64::from(self.config.max_requests);
        let rate = self.config.refill_rate();
        let mut waited = Duration::ZERO;

        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let now = Instant::now();
                let bucket = buckets.entry(source_id.to_string()).or_insert(Bucket {
                    tokens: capacity,
                    last_refill: now,
                    consecutive_waits: 0,
                });

                // Continuous refill since the last check.
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    bucket.consecutive_waits = 0;
                    return Ok(());
                }

                let base_wait = Duration::from_secs_f64((1.0 - bucket.tokens) / rate);
                let wait = if self.config.backoff_factor > 1.0 {
                    let pressure = bucket.consecutive_waits.min(8);
                    base_wait.mul_f64(self.config.backoff_factor.powi(pressure as i32))
                } else {
                    base_wait
                };
                bucket.consecutive_waits = bucket.consecutive_waits.saturating_add(1);
                wait
                // Lock dropped here so other sources aren't blocked.
            };

            if let Some(max_wait) = self.config.max_wait
                && waited + wait > max_wait
            {
                return Err(RateLimitTimeout {
                    source_id: source_id.to_string(),
                    needed: waited + wait,
                    max_wait,
                });
            }

            tracing::debug!(
                source = %source_id,
                wait_ms = wait.as_millis() as u64,
                "Rate limit reached, waiting for token"
            );
            time::sleep(wait).await;
            waited += wait;
            // Loop back: another task may have consumed the refilled token.
        }
    }
}
