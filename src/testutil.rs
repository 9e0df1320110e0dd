//! Test utilities: a scripted mock scraper source.
//!
//! Handwritten mock for dependency injection in unit and integration
//! tests, using `Arc<Mutex<_>>` interior mutability so tests can assert
//! on recorded calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{TimeDelta, Utc};

use crate::error::AppError;
use crate::models::JobPosting;

/// Mock source that plays back scripted fetch results.
///
/// Each `fetch` call pops the next scripted response; once the script is
/// exhausted, the fallback response is repeated indefinitely.
#[derive(Clone)]
pub struct MockSource {
    responses: Arc<Mutex<Vec<Result<serde_json::Value, AppError>>>>,
    fallback: Arc<Result<serde_json::Value, AppError>>,
    calls: Arc<AtomicUsize>,
}

impl MockSource {
    /// Source that always succeeds with the given payload.
    pub fn ok(payload: serde_json::Value) -> Self {
        Self::with_responses(Vec::new(), Ok(payload))
    }

    /// Source that always fails with the given error.
    pub fn failing(error: AppError) -> Self {
        Self::with_responses(Vec::new(), Err(error))
    }

    /// Scripted responses followed by a repeating fallback.
    pub fn with_responses(
        responses: Vec<Result<serde_json::Value, AppError>>,
        fallback: Result<serde_json::Value, AppError>,
    ) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            fallback: Arc::new(fallback),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn fetch(&self) -> Result<serde_json::Value, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            self.fallback.as_ref().clone()
        } else {
            responses.remove(0)
        }
    }

    /// Total number of `fetch` invocations so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// A realistic job posting for scoring tests.
pub fn make_test_job() -> JobPosting {
    let mut job = JobPosting::new("Senior Python Engineer");
    job.company = Some("Acme Corp".into());
    job.location = Some("Berlin, Germany".into());
    job.description = Some("Python, asyncio, and PostgreSQL in production".into());
    job.salary_min = Some(110_000);
    job.salary_max = Some(150_000);
    job.remote = Some(true);
    job.posted_at = Some(Utc::now() - TimeDelta::days(2));
    job
}
