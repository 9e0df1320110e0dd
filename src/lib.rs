//! Resilience and scoring core for job-search automation.
//!
//! Wraps unreliable job-board scrapers in a rate limiter, per-source
//! circuit breakers, and bounded retries, tracks rolling source health,
//! and ranks scraped postings against user preferences with a
//! deterministic multi-factor score. Persistence, notification transport,
//! and the scraping sources themselves are external collaborators.

pub mod circuit_breaker;
pub mod error;
pub mod health;
pub mod models;
pub mod rate_limit;
pub mod retry;
pub mod scoring;
pub mod scraper;
pub mod testutil;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::{AppError, ConfigError};
pub use health::{HealthMonitor, SourceHealth};
pub use models::{JobPosting, UserPreferences};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use retry::{BackoffStrategy, RetryConfig, RetryExecutor};
pub use scoring::{ScoreResult, ScoreWeights, ScoringEngine};
pub use scraper::{ResilientScraper, ScrapeError};
