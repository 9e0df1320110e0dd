//! Resilient execution of scrape operations against one source.
//!
//! Composes the rate limiter, per-source circuit breakers, the retry
//! executor, and health recording into a single entry point:
//!
//! ```text
//! acquire token → breaker.call( retry.run(fetch_fn) ) → record health
//! ```
//!
//! The ordering matters: rate limiting applies to every logical attempt
//! (half-open trials included), the breaker sees one success/failure per
//! logical attempt no matter how many internal retries happened, and the
//! health monitor observes each logical attempt exactly once.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerStats,
};
use crate::error::{AppError, ConfigError};
use crate::health::HealthMonitor;
use crate::rate_limit::{RateLimitTimeout, RateLimiter, RateLimiterConfig};
use crate::retry::{RetryConfig, RetryError, RetryExecutor};

/// Error surface of [`ResilientScraper::execute`].
///
/// `CircuitOpen` is expected, frequently-occurring control flow for a
/// known-bad source; the orchestrator branches on it and skips the source
/// for the cycle.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("source '{source_id}' circuit open, retry after {}s", .retry_after.as_secs())]
    CircuitOpen {
        source_id: String,
        retry_after: Duration,
    },

    #[error("source '{source_id}': all {attempts} attempts failed")]
    RetriesExhausted {
        source_id: String,
        attempts: u32,
        #[source]
        source: AppError,
    },

    #[error(transparent)]
    RateLimitTimeout(#[from] RateLimitTimeout),

    #[error("scrape of '{source_id}' cancelled")]
    Cancelled { source_id: String },
}

/// Executes scrape operations with rate limiting, circuit breaking,
/// retries, and health accounting.
///
/// The health monitor is injected so the orchestrator can share one
/// monitor across several scrapers; breakers and buckets are created
/// lazily per source in an internal arena, so unrelated sources never
/// serialise on each other.
#[derive(Clone)]
pub struct ResilientScraper {
    limiter: RateLimiter,
    retry: RetryExecutor,
    breaker_config: CircuitBreakerConfig,
    breakers: Arc<Mutex<HashMap<String, CircuitBreaker>>>,
    health: HealthMonitor,
}

impl ResilientScraper {
    pub fn new(
        limiter_config: RateLimiterConfig,
        breaker_config: CircuitBreakerConfig,
        retry_config: RetryConfig,
        health: HealthMonitor,
    ) -> Result<Self, ConfigError> {
        breaker_config.validate()?;
        Ok(Self {
            limiter: RateLimiter::new(limiter_config)?,
            retry: RetryExecutor::new(retry_config)?,
            breaker_config,
            breakers: Arc::new(Mutex::new(HashMap::new())),
            health,
        })
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// Breaker statistics for a source, `None` until its first execute.
    pub fn breaker_stats(&self, source_id: &str) -> Option<CircuitBreakerStats> {
        self.lock_breakers().get(source_id).map(CircuitBreaker::stats)
    }

    /// Run `fetch_fn` against `source_id` under the full resilience stack.
    ///
    /// One call is one logical attempt: internal retries are invisible to
    /// the breaker and the health monitor.
    pub async fn execute<F, Fut, T>(&self, source_id: &str, fetch_fn: F) -> Result<T, ScrapeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        self.execute_inner(source_id, None, fetch_fn).await
    }

    /// Like [`execute`](Self::execute), aborting a pending rate-limit wait
    /// or pending retries when the token is cancelled. A cancelled attempt
    /// leaves breaker and health state untouched.
    pub async fn execute_cancellable<F, Fut, T>(
        &self,
        source_id: &str,
        cancel: &CancellationToken,
        fetch_fn: F,
    ) -> Result<T, ScrapeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        self.execute_inner(source_id, Some(cancel), fetch_fn).await
    }

    async fn execute_inner<F, Fut, T>(
        &self,
        source_id: &str,
        cancel: Option<&CancellationToken>,
        fetch_fn: F,
    ) -> Result<T, ScrapeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        // Rate limiting applies to every logical attempt, including probes
        // against a half-open breaker. A caller waiting for a token can be
        // cancelled out of the wait; no attempt has started yet, so nothing
        // is recorded.
        let acquired = match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        return Err(ScrapeError::Cancelled {
                            source_id: source_id.to_string(),
                        });
                    }
                    res = self.limiter.acquire(source_id) => res,
                }
            }
            None => self.limiter.acquire(source_id).await,
        };
        if let Err(e) = acquired {
            self.health
                .record_attempt(source_id, false, 0.0, Some(&e.to_string()));
            return Err(ScrapeError::from(e));
        }

        let breaker = self.breaker_for(source_id);
        let started = Instant::now();

        let result = breaker
            .call(|| async {
                match cancel {
                    Some(token) => self.retry.run_cancellable(token, fetch_fn).await,
                    None => self.retry.run(fetch_fn).await,
                }
            })
            .await;

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(value) => {
                self.health.record_attempt(source_id, true, latency_ms, None);
                Ok(value)
            }
            Err(CircuitBreakerError::Open { retry_after, .. }) => {
                let err = ScrapeError::CircuitOpen {
                    source_id: source_id.to_string(),
                    retry_after,
                };
                // Rejections are instant; don't pollute latency stats.
                self.health
                    .record_attempt(source_id, false, 0.0, Some(&err.to_string()));
                Err(err)
            }
            Err(CircuitBreakerError::Inner(RetryError::Exhausted { attempts, source })) => {
                self.health.record_attempt(
                    source_id,
                    false,
                    latency_ms,
                    Some(&source.to_string()),
                );
                Err(ScrapeError::RetriesExhausted {
                    source_id: source_id.to_string(),
                    attempts,
                    source,
                })
            }
            Err(CircuitBreakerError::Inner(RetryError::Cancelled { .. })) => {
                // Cancellation is the caller's doing, not the source's;
                // nothing is recorded against it.
                Err(ScrapeError::Cancelled {
                    source_id: source_id.to_string(),
                })
            }
        }
    }

    fn lock_breakers(&self) -> std::sync::MutexGuard<'_, HashMap<String, CircuitBreaker>> {
        self.breakers.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned breaker arena mutex");
            poisoned.into_inner()
        })
    }

    /// Fetch or lazily create the breaker for a source. The arena lock is
    /// held only for the lookup, never across a call.
    fn breaker_for(&self, source_id: &str) -> CircuitBreaker {
        let mut breakers = self.lock_breakers();
        breakers
            .entry(source_id.to_string())
            .or_insert_with(|| {
                CircuitBreaker::new_unchecked(source_id, self.breaker_config.clone())
            })
            .clone()
    }
}
