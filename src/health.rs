//! Rolling per-source health tracking.
//!
//! Every logical scrape attempt is recorded exactly once; health is derived
//! from consecutive failures and a bounded recent-attempts window, so a
//! source that recovers shows up healthy again without a manual reset.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Attempts kept in the rolling success-rate window.
const RECENT_WINDOW: usize = 20;

/// Minimum samples in the window before the success-rate rule applies,
/// so one early failure doesn't flag a fresh source.
const MIN_SAMPLES_FOR_RATE: usize = 5;

/// Consecutive failures at which a source is considered unhealthy.
const CONSECUTIVE_FAILURE_LIMIT: u32 = 3;

/// Snapshot of one source's health, suitable for monitoring endpoints.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceHealth {
    pub source_id: String,
    pub consecutive_failures: u32,
    pub total_attempts: u64,
    pub total_successes: u64,
    pub last_latency_ms: f64,
    /// Success rate over the recent-attempts window, in [0, 1].
    pub success_rate: f64,
    pub is_healthy: bool,
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct HealthEntry {
    consecutive_failures: u32,
    total_attempts: u64,
    total_successes: u64,
    last_latency_ms: f64,
    /// Outcomes of the most recent attempts, oldest first.
    recent: VecDeque<bool>,
    last_error: Option<String>,
}

impl HealthEntry {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            total_attempts: 0,
            total_successes: 0,
            last_latency_ms: 0.0,
            recent: VecDeque::with_capacity(RECENT_WINDOW),
            last_error: None,
        }
    }

    fn success_rate(&self) -> f64 {
        if self.recent.is_empty() {
            return 1.0;
        }
        let successes = self.recent.iter().filter(|s| **s).count();
        successes as f64 / self.recent.len() as f64
    }

    fn is_healthy(&self) -> bool {
        if self.consecutive_failures >= CONSECUTIVE_FAILURE_LIMIT {
            return false;
        }
        self.recent.len() < MIN_SAMPLES_FOR_RATE || self.success_rate() >= 0.5
    }

    fn snapshot(&self, source_id: &str) -> SourceHealth {
        SourceHealth {
            source_id: source_id.to_string(),
            consecutive_failures: self.consecutive_failures,
            total_attempts: self.total_attempts,
            total_successes: self.total_successes,
            last_latency_ms: self.last_latency_ms,
            success_rate: self.success_rate(),
            is_healthy: self.is_healthy(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Aggregates attempt outcomes per source.
///
/// Constructed once by the orchestrator and handed to each
/// [`ResilientScraper`](crate::scraper::ResilientScraper) — no process-wide
/// singleton. Entries are created lazily on the first recorded attempt and
/// only removed by an explicit [`reset`](Self::reset).
#[derive(Clone, Default)]
pub struct HealthMonitor {
    entries: Arc<Mutex<HashMap<String, HealthEntry>>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, HealthEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned health monitor mutex");
            poisoned.into_inner()
        })
    }

    /// Record one logical attempt against `source_id`. Returns the updated
    /// snapshot for convenience.
    pub fn record_attempt(
        &self,
        source_id: &str,
        success: bool,
        latency_ms: f64,
        error: Option<&str>,
    ) -> SourceHealth {
        let mut entries = self.lock_entries();
        let entry = entries
            .entry(source_id.to_string())
            .or_insert_with(HealthEntry::new);

        let was_healthy = entry.is_healthy();

        entry.total_attempts += 1;
        entry.last_latency_ms = latency_ms;
        if success {
            entry.total_successes += 1;
            entry.consecutive_failures = 0;
            entry.last_error = None;
        } else {
            entry.consecutive_failures += 1;
            entry.last_error = error.map(str::to_string);
        }

        if entry.recent.len() == RECENT_WINDOW {
            entry.recent.pop_front();
        }
        entry.recent.push_back(success);

        let snapshot = entry.snapshot(source_id);
        if was_healthy && !snapshot.is_healthy {
            tracing::warn!(
                source = %source_id,
                consecutive_failures = snapshot.consecutive_failures,
                success_rate = snapshot.success_rate,
                "Source became unhealthy"
            );
        } else if !was_healthy && snapshot.is_healthy {
            tracing::info!(source = %source_id, "Source recovered");
        }
        snapshot
    }

    /// Health snapshot for one source, `None` until its first attempt.
    pub fn get_health_status(&self, source_id: &str) -> Option<SourceHealth> {
        self.lock_entries()
            .get(source_id)
            .map(|e| e.snapshot(source_id))
    }

    /// All sources currently considered unhealthy.
    pub fn get_unhealthy_scrapers(&self) -> Vec<SourceHealth> {
        self.lock_entries()
            .iter()
            .filter(|(_, e)| !e.is_healthy())
            .map(|(id, e)| e.snapshot(id))
            .collect()
    }

    /// Snapshot of every tracked source.
    pub fn all(&self) -> Vec<SourceHealth> {
        self.lock_entries()
            .iter()
            .map(|(id, e)| e.snapshot(id))
            .collect()
    }

    /// Drop all recorded state for a source.
    pub fn reset(&self, source_id: &str) {
        self.lock_entries().remove(source_id);
        tracing::info!(source = %source_id, "Health state reset");
    }
}
