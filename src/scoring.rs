//! Deterministic multi-factor job scoring.
//!
//! Maps a (job, preferences) pair to a score in [0, 100] plus an ordered
//! list of per-factor reasons. Identical inputs always produce identical
//! output — callers that need reproducibility across wall-clock boundaries
//! use [`ScoringEngine::score_at`] with a pinned timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::{JobPosting, UserPreferences};

/// Full recency credit at age zero, decaying linearly to none at this age.
const RECENCY_HORIZON_DAYS: f64 = 30.0;

/// Relative factor weights. Normalised by their sum at scoring time, so
/// the total score stays in [0, 100] even for custom weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub skills: f64,
    pub salary: f64,
    pub location: f64,
    pub reputation: f64,
    pub recency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            skills: 0.40,
            salary: 0.25,
            location: 0.20,
            reputation: 0.10,
            recency: 0.05,
        }
    }
}

impl ScoreWeights {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let weights = [
            self.skills,
            self.salary,
            self.location,
            self.reputation,
            self.recency,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError(
                "score weights must be finite and non-negative".into(),
            ));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(ConfigError("score weights must not all be zero".into()));
        }
        Ok(())
    }

    fn sum(&self) -> f64 {
        self.skills + self.salary + self.location + self.reputation + self.recency
    }
}

/// One factor's contribution to a score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreFactor {
    /// Stable factor name: skills, salary, location, reputation, recency.
    pub factor: &'static str,
    /// Points contributed to the final score.
    pub contribution: f64,
    pub reason: String,
}

/// Result of scoring one job against one set of preferences.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreResult {
    /// Total score in [0, 100].
    pub score: f64,
    /// Per-factor breakdown, always in the fixed order
    /// skills, salary, location, reputation, recency.
    pub reasons: Vec<ScoreFactor>,
}

/// Pure scoring function over jobs and user preferences.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoringEngine;

impl ScoringEngine {
    pub fn new() -> Self {
        Self
    }

    /// Score `job` against `preferences` using the current time for the
    /// recency factor.
    pub fn score(
        &self,
        job: &JobPosting,
        preferences: &UserPreferences,
    ) -> Result<ScoreResult, ConfigError> {
        self.score_at(job, preferences, Utc::now())
    }

    /// Score with an explicit `now`, for reproducible results.
    pub fn score_at(
        &self,
        job: &JobPosting,
        preferences: &UserPreferences,
        now: DateTime<Utc>,
    ) -> Result<ScoreResult, ConfigError> {
        preferences.weights.validate()?;
        let weights = preferences.weights;
        let total_weight = weights.sum();

        let factors = [
            ("skills", weights.skills, skills_factor(job, preferences)),
            ("salary", weights.salary, salary_factor(job, preferences)),
            (
                "location",
                weights.location,
                location_factor(job, preferences),
            ),
            ("reputation", weights.reputation, reputation_factor(job)),
            ("recency", weights.recency, recency_factor(job, now)),
        ];

        let mut score = 0.0;
        let mut reasons = Vec::with_capacity(factors.len());
        for (factor, weight, (value, reason)) in factors {
            let contribution = 100.0 * (weight / total_weight) * value;
            score += contribution;
            reasons.push(ScoreFactor {
                factor,
                contribution,
                reason,
            });
        }

        Ok(ScoreResult {
            score: score.clamp(0.0, 100.0),
            reasons,
        })
    }
}

/// Keyword matches over title + description, normalised to [0, 1].
fn skills_factor(job: &JobPosting, prefs: &UserPreferences) -> (f64, String) {
    if prefs.keywords.is_empty() {
        return (1.0, "no keywords configured".to_string());
    }

    let haystack = format!(
        "{} {}",
        job.title,
        job.description.as_deref().unwrap_or_default()
    )
    .to_lowercase();

    let matched: Vec<&str> = prefs
        .keywords
        .iter()
        .filter(|kw| haystack.contains(&kw.to_lowercase()))
        .map(String::as_str)
        .collect();

    let value = (matched.len() as f64 / prefs.keywords.len() as f64).min(1.0);
    let reason = if matched.is_empty() {
        format!("matched 0/{} keywords", prefs.keywords.len())
    } else {
        format!(
            "matched {}/{} keywords: {}",
            matched.len(),
            prefs.keywords.len(),
            matched.join(", ")
        )
    };
    (value, reason)
}

fn salary_factor(job: &JobPosting, prefs: &UserPreferences) -> (f64, String) {
    let Some(floor) = prefs.salary_min else {
        return (1.0, "no salary floor configured".to_string());
    };
    match (job.salary_min, job.salary_max) {
        (_, Some(job_max)) if job_max < floor => {
            (0.0, format!("max salary {job_max} below floor {floor}"))
        }
        (_, Some(job_max)) => (1.0, format!("salary {job_max} meets floor {floor}")),
        // A minimum that already clears the floor is enough; a minimum
        // below the floor says nothing about the top of the range.
        (Some(job_min), None) if job_min >= floor => {
            (1.0, format!("salary {job_min}+ meets floor {floor}"))
        }
        (Some(_), None) | (None, None) => (0.5, format!("salary unknown (floor {floor})")),
    }
}

fn location_factor(job: &JobPosting, prefs: &UserPreferences) -> (f64, String) {
    if prefs.locations.is_empty() {
        return (1.0, "no location preference".to_string());
    }

    let wants_remote = prefs
        .locations
        .iter()
        .any(|l| l.eq_ignore_ascii_case("remote"));
    if wants_remote && job.remote == Some(true) {
        return (1.0, "remote position matches preference".to_string());
    }

    if let Some(location) = &job.location {
        let job_loc = location.to_lowercase();
        let matched = prefs.locations.iter().find(|pref| {
            let pref = pref.to_lowercase();
            job_loc.contains(&pref) || pref.contains(&job_loc)
        });
        match matched {
            Some(pref) => (1.0, format!("location '{location}' matches '{pref}'")),
            None => (0.0, format!("location '{location}' not in preferred list")),
        }
    } else {
        (0.0, "no location information".to_string())
    }
}

fn reputation_factor(job: &JobPosting) -> (f64, String) {
    match job.company_reputation {
        Some(score) => {
            let clamped = score.clamp(0.0, 1.0);
            (clamped, format!("company reputation {clamped:.2}"))
        }
        None => (0.5, "no reputation signal, neutral".to_string()),
    }
}

fn recency_factor(job: &JobPosting, now: DateTime<Utc>) -> (f64, String) {
    match job.posted_at {
        None => (0.0, "posting date unknown".to_string()),
        Some(posted_at) => {
            let age_days = (now - posted_at).num_seconds().max(0) as f64 / 86_400.0;
            let value = (1.0 - age_days / RECENCY_HORIZON_DAYS).clamp(0.0, 1.0);
            (value, format!("posted {age_days:.0} days ago"))
        }
    }
}
