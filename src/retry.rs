//! Bounded retries with selectable backoff strategy.
//!
//! Wraps a fallible async operation and retries it up to a configured
//! number of attempts, sleeping between attempts according to the backoff
//! strategy. Composed *inside* the circuit breaker (see
//! [`crate::scraper`]), so a breaker rejection never consumes a retry
//! attempt and a whole retried sequence counts as one logical attempt for
//! breaker accounting.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::CircuitClass;
use crate::error::{AppError, ConfigError};

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Every wait is `base_delay`.
    Fixed,
    /// Wait is `base_delay * attempts_used`.
    Linear,
    /// Wait is `base_delay * 2^(attempts_used - 1)`, capped at `max_delay`.
    Exponential,
}

/// Configuration for the retry executor.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first (so 1 means no retries).
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound on any single backoff wait.
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError("max_attempts must be >= 1".into()));
        }
        if self.base_delay.is_zero() {
            return Err(ConfigError("base_delay must be > 0".into()));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError("max_delay must be >= base_delay".into()));
        }
        Ok(())
    }

    /// Delay before the next attempt, given how many attempts have already
    /// been used (1-indexed). All strategies are capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempts_used: u32) -> Duration {
        let n = attempts_used.max(1);
        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(n),
            BackoffStrategy::Exponential => {
                self.base_delay.saturating_mul(2u32.saturating_pow(n - 1))
            }
        };
        delay.min(self.max_delay)
    }
}

/// Error type for retry execution.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// Every attempt failed; carries the final underlying error.
    #[error("all {attempts} attempts failed: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: AppError,
    },
    /// The caller cancelled while attempts remained.
    #[error("retry aborted by cancellation after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl CircuitClass for RetryError {
    fn is_attempt_outcome(&self) -> bool {
        match self {
            // The whole retried sequence is one logical attempt; exhausting
            // it is one failure against the breaker's window.
            RetryError::Exhausted { .. } => true,
            // The caller aborted; the source never produced an outcome.
            RetryError::Cancelled { .. } => false,
        }
    }
}

/// Executes operations with bounded retries and backoff.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation`, retrying on error up to `max_attempts` total
    /// invocations.
    pub async fn run<F, Fut, T>(&self, operation: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        self.run_inner(None, operation).await
    }

    /// Like [`run`](Self::run), but aborts pending backoff waits when the
    /// token is cancelled. An in-flight attempt is not interrupted mid-way;
    /// cancellation is observed between attempts.
    pub async fn run_cancellable<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        self.run_inner(Some(cancel), operation).await
    }

    async fn run_inner<F, Fut, T>(
        &self,
        cancel: Option<&CancellationToken>,
        mut operation: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut attempts = 0u32;
        loop {
            if let Some(token) = cancel
                && token.is_cancelled()
            {
                return Err(RetryError::Cancelled { attempts });
            }

            attempts += 1;
            match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::debug!(attempts, "Operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if attempts >= self.config.max_attempts {
                        return Err(RetryError::Exhausted {
                            attempts,
                            source: e,
                        });
                    }

                    let delay = self.config.delay_for_attempt(attempts);
                    tracing::debug!(
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, backing off"
                    );

                    match cancel {
                        Some(token) => {
                            tokio::select! {
                                () = tokio::time::sleep(delay) => {}
                                () = token.cancelled() => {
                                    return Err(RetryError::Cancelled { attempts });
                                }
                            }
                        }
                        None => tokio::time::sleep(delay).await,
                    }
                }
            }
        }
    }
}
