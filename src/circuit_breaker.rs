//! Circuit breaker pattern for scraper-source resilience.
//!
//! Protects against hammering a job board that is currently failing.
//! Failures are tracked in a sliding wall-clock window, so a burst of
//! errors followed by silence decays naturally instead of lingering in a
//! counter.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED (healthy) --[N failures in window]--> OPEN (rejecting) --[timeout]--> HALF_OPEN (probing)
//!                                                                                   |
//!                                                 <--[failure]--                    |
//!                                                                                   |
//! CLOSED <-------------------------[M consecutive successes]-----------------------+
//! ```
//!
//! A rejection ([`CircuitBreakerError::Open`]) is expected control flow for a
//! known-bad source, not an exceptional condition; callers branch on it and
//! move on to the next source.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{AppError, ConfigError};

/// Distinguishes attempt outcomes from aborts for errors flowing through
/// the breaker.
///
/// Every genuine failure counts against the failure window, whatever its
/// cause. The one exception is cancellation: the caller tore the attempt
/// down before the source produced an outcome, so the window stays
/// untouched.
pub trait CircuitClass: std::error::Error {
    /// True when the error is a real outcome of the attempted operation.
    fn is_attempt_outcome(&self) -> bool {
        true
    }
}

impl CircuitClass for AppError {}

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally.
    Closed,
    /// Circuit is open - requests are rejected immediately.
    Open,
    /// Circuit is half-open - a single trial request allowed to test recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of failures within `window` before opening the circuit.
    pub failure_threshold: u32,

    /// Number of consecutive successful probes in half-open state to close
    /// the circuit.
    pub success_threshold: u32,

    /// Time to wait before transitioning from Open to Half-Open.
    pub timeout: Duration,

    /// Sliding window over which failures are counted. Entries older than
    /// this are pruned on every evaluation.
    pub window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            window: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError("failure_threshold must be > 0".into()));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError("success_threshold must be > 0".into()));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError("timeout must be > 0".into()));
        }
        if self.window.is_zero() {
            return Err(ConfigError("window must be > 0".into()));
        }
        Ok(())
    }
}

/// Internal state tracking for the circuit breaker.
#[derive(Debug)]
struct CircuitBreakerInner {
    state: CircuitState,
    /// Failure timestamps within the sliding window.
    failures: Vec<Instant>,
    success_count: u32,
    opened_at: Option<Instant>,
    last_error_message: Option<String>,
    /// Probes currently executing while half-open. At most one is allowed;
    /// extra concurrent callers are rejected as if the circuit were open.
    half_open_inflight: u32,
}

impl CircuitBreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: Vec::new(),
            success_count: 0,
            opened_at: None,
            last_error_message: None,
            half_open_inflight: 0,
        }
    }
}

/// Statistics about circuit breaker state for monitoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failures_in_window: u32,
    pub success_count: u32,
    pub last_error: Option<String>,
    pub time_until_half_open: Option<Duration>,
}

/// Error type for circuit breaker operations.
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E: std::error::Error> {
    /// Circuit is open - the call was rejected without invoking the operation.
    #[error("circuit breaker '{name}' is open, retry after {}s", .retry_after.as_secs())]
    Open { name: String, retry_after: Duration },
    /// The inner operation failed.
    #[error(transparent)]
    Inner(E),
}

/// Thread-safe circuit breaker guarding calls against one scraper source.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<CircuitBreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new_unchecked(name, config))
    }

    /// Construct from a config that has already been validated.
    pub(crate) fn new_unchecked(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Arc::new(Mutex::new(CircuitBreakerInner::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, CircuitBreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(circuit = %self.name, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    /// Returns the current state, handling lazy Open → HalfOpen transitions.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        prune_window(&mut inner.failures, Instant::now(), self.config.window);

        let time_until_half_open = if inner.state == CircuitState::Open {
            inner.opened_at.map(|t| {
                let elapsed = t.elapsed();
                if elapsed < self.config.timeout {
                    self.config.timeout - elapsed
                } else {
                    Duration::ZERO
                }
            })
        } else {
            None
        };

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failures_in_window: inner.failures.len() as u32,
            success_count: inner.success_count,
            last_error: inner.last_error_message.clone(),
            time_until_half_open,
        }
    }

    /// Executes the given operation through the circuit breaker.
    ///
    /// - Closed: executes operation, tracks success/failure
    /// - Open: returns `CircuitBreakerError::Open` immediately
    /// - HalfOpen: executes one trial at a time; concurrent extras are
    ///   rejected as if open
    pub async fn call<F, T, Fut, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: CircuitClass,
    {
        // Admission check.
        let is_probe = {
            let mut inner = self.lock_inner();
            self.maybe_transition_to_half_open(&mut inner);

            match inner.state {
                CircuitState::Open => {
                    let retry_after = inner
                        .opened_at
                        .map(|t| {
                            let elapsed = t.elapsed();
                            if elapsed < self.config.timeout {
                                self.config.timeout - elapsed
                            } else {
                                Duration::ZERO
                            }
                        })
                        .unwrap_or(self.config.timeout);

                    return Err(CircuitBreakerError::Open {
                        name: self.name.clone(),
                        retry_after,
                    });
                }
                CircuitState::HalfOpen => {
                    if inner.half_open_inflight >= 1 {
                        // A probe is already running; don't thundering-herd it.
                        return Err(CircuitBreakerError::Open {
                            name: self.name.clone(),
                            retry_after: Duration::ZERO,
                        });
                    }
                    inner.half_open_inflight += 1;
                    true
                }
                CircuitState::Closed => false,
            }
        };

        // Execute the operation outside the lock.
        let result = operation().await;

        if is_probe {
            let mut inner = self.lock_inner();
            inner.half_open_inflight = inner.half_open_inflight.saturating_sub(1);
        }

        // Record the result.
        match &result {
            Ok(_) => self.record_success(),
            Err(e) => {
                if e.is_attempt_outcome() {
                    self.record_failure(e);
                }
            }
        }

        result.map_err(CircuitBreakerError::Inner)
    }

    pub fn record_success(&self) {
        let mut inner = self.lock_inner();

        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    tracing::info!(
                        circuit = %self.name,
                        "Circuit breaker closing after {} successful probes",
                        inner.success_count
                    );
                    inner.state = CircuitState::Closed;
                    inner.failures.clear();
                    inner.success_count = 0;
                    inner.opened_at = None;
                    inner.last_error_message = None;
                }
            }
            // A success in Closed doesn't clear the window; old failures
            // decay on their own.
            CircuitState::Closed => {}
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, error: &dyn fmt::Display) {
        let mut inner = self.lock_inner();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => {
                inner.failures.push(now);
                prune_window(&mut inner.failures, now, self.config.window);
                inner.last_error_message = Some(error.to_string());

                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    tracing::warn!(
                        circuit = %self.name,
                        failures = inner.failures.len(),
                        error = %error,
                        "Circuit breaker opening after {} failures in window",
                        inner.failures.len()
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(
                    circuit = %self.name,
                    error = %error,
                    "Circuit breaker probe failed, returning to open state"
                );
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.last_error_message = Some(error.to_string());
                inner.success_count = 0;
            }
            CircuitState::Open => {
                inner.last_error_message = Some(error.to_string());
            }
        }
    }

    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        tracing::info!(circuit = %self.name, "Circuit breaker manually reset");
        inner.state = CircuitState::Closed;
        inner.failures.clear();
        inner.success_count = 0;
        inner.opened_at = None;
        inner.last_error_message = None;
        inner.half_open_inflight = 0;
    }

    fn maybe_transition_to_half_open(&self, inner: &mut CircuitBreakerInner) {
        if inner.state == CircuitState::Open
            && let Some(opened_at) = inner.opened_at
            && opened_at.elapsed() >= self.config.timeout
        {
            tracing::info!(
                circuit = %self.name,
                "Circuit breaker transitioning to half-open state"
            );
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
            inner.half_open_inflight = 0;
        }
    }
}

/// Drop failure timestamps older than `window`.
fn prune_window(failures: &mut Vec<Instant>, now: Instant, window: Duration) {
    failures.retain(|t| now.duration_since(*t) < window);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(config: CircuitBreakerConfig) -> CircuitBreaker {
        CircuitBreaker::new("test", config).unwrap()
    }

    #[test]
    fn test_config_validation_rejects_zero_thresholds() {
        let config = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(CircuitBreaker::new("test", config).is_err());

        let config = CircuitBreakerConfig {
            success_threshold: 0,
            ..Default::default()
        };
        assert!(CircuitBreaker::new("test", config).is_err());

        let config = CircuitBreakerConfig {
            window: Duration::ZERO,
            ..Default::default()
        };
        assert!(CircuitBreaker::new("test", config).is_err());
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = breaker(CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_opens_after_threshold_failures() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });

        for _ in 0..3 {
            cb.record_failure(&AppError::NetworkError("test".into()));
        }

        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_circuit_stays_closed_below_threshold() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 5,
            ..Default::default()
        });

        for _ in 0..4 {
            cb.record_failure(&AppError::NetworkError("test".into()));
        }

        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_failures_outside_window_decay() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            window: Duration::from_millis(50),
            ..Default::default()
        });

        cb.record_failure(&AppError::NetworkError("test".into()));
        cb.record_failure(&AppError::NetworkError("test".into()));

        std::thread::sleep(Duration::from_millis(60));

        // The earlier burst has aged out, so this third failure doesn't trip.
        cb.record_failure(&AppError::NetworkError("test".into()));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failures_in_window, 1);
    }

    #[test]
    fn test_success_does_not_clear_window() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });

        cb.record_failure(&AppError::NetworkError("test".into()));
        cb.record_failure(&AppError::NetworkError("test".into()));
        cb.record_success();
        cb.record_failure(&AppError::NetworkError("test".into()));

        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_circuit_transitions_to_half_open() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            timeout: Duration::from_millis(10),
            ..Default::default()
        });

        cb.record_failure(&AppError::NetworkError("test".into()));
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_closes_on_success() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            timeout: Duration::from_millis(1),
            ..Default::default()
        });

        cb.record_failure(&AppError::NetworkError("test".into()));
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failures_in_window, 0);
    }

    #[test]
    fn test_half_open_reopens_on_failure() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            timeout: Duration::from_millis(1),
            ..Default::default()
        });

        cb.record_failure(&AppError::NetworkError("test".into()));
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure(&AppError::NetworkError("test".into()));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_manual_reset() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            timeout: Duration::from_secs(300),
            ..Default::default()
        });

        cb.record_failure(&AppError::NetworkError("test".into()));
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_call_returns_open_error_when_circuit_open() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            timeout: Duration::from_secs(60),
            ..Default::default()
        });
        cb.record_failure(&AppError::NetworkError("test".into()));

        let result = cb
            .call(|| async { Ok::<_, AppError>("should not execute".to_string()) })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
    }

    #[tokio::test]
    async fn test_call_executes_when_closed() {
        let cb = breaker(CircuitBreakerConfig::default());

        let result = cb
            .call(|| async { Ok::<_, AppError>("success".to_string()) })
            .await;

        assert_eq!(result.unwrap(), "success");
    }

    #[tokio::test]
    async fn test_call_records_failure() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        });

        let _ = cb
            .call(|| async { Err::<String, _>(AppError::NetworkError("fail".into())) })
            .await;

        let stats = cb.stats();
        assert_eq!(stats.failures_in_window, 1);
        assert!(stats.last_error.is_some());
    }

    #[tokio::test]
    async fn test_persistent_parse_failures_open_circuit() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 5,
            ..Default::default()
        });

        for _ in 0..5 {
            let result = cb
                .call(|| async { Err::<String, _>(AppError::ParseError("bad json".into())) })
                .await;
            assert!(matches!(result, Err(CircuitBreakerError::Inner(_))));
        }

        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.stats().failures_in_window, 5);

        // The sixth call must fail fast without touching the source.
        let mut invoked = false;
        let result = cb
            .call(|| {
                invoked = true;
                async { Err::<String, _>(AppError::ParseError("bad json".into())) }
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
        assert!(!invoked);
    }

    #[tokio::test]
    async fn test_half_open_probe_parse_failure_reopens() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            timeout: Duration::from_millis(1),
            ..Default::default()
        });

        cb.record_failure(&AppError::NetworkError("test".into()));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let result = cb
            .call(|| async { Err::<String, _>(AppError::ParseError("bad json".into())) })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Inner(_))));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_open_rejects_concurrent_probes() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            timeout: Duration::from_millis(1),
            ..Default::default()
        });

        cb.record_failure(&AppError::NetworkError("test".into()));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let probe_cb = cb.clone();
        let probe = tokio::spawn(async move {
            probe_cb
                .call(|| async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, AppError>("probe ok".to_string())
                })
                .await
        });

        // Let the probe get admitted before racing it.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = cb
            .call(|| async { Ok::<_, AppError>("extra".to_string()) })
            .await;
        assert!(matches!(second, Err(CircuitBreakerError::Open { .. })));

        let probe_result = probe.await.unwrap();
        assert_eq!(probe_result.unwrap(), "probe ok");
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
