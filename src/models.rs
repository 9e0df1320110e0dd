use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scoring::ScoreWeights;

/// A job posting as normalised from a scraper source.
///
/// Everything beyond the title is optional: job boards disagree wildly on
/// what they expose, and the scoring engine degrades gracefully on missing
/// fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPosting {
    pub title: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub salary_min: Option<i64>,
    #[serde(default)]
    pub salary_max: Option<i64>,
    #[serde(default)]
    pub remote: Option<bool>,
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
    /// External reputation signal in [0, 1], supplied by an enrichment
    /// step if available.
    #[serde(default)]
    pub company_reputation: Option<f64>,
}

impl JobPosting {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            company: None,
            location: None,
            description: None,
            salary_min: None,
            salary_max: None,
            remote: None,
            posted_at: None,
            company_reputation: None,
        }
    }
}

/// What the user is looking for, as configured by the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPreferences {
    /// Skills/keywords matched case-insensitively against title + description.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Preferred locations; "Remote" matches the remote flag.
    #[serde(default)]
    pub locations: Vec<String>,
    /// Minimum acceptable salary.
    #[serde(default)]
    pub salary_min: Option<i64>,
    /// Factor weights; defaults documented on [`ScoreWeights`].
    #[serde(default)]
    pub weights: ScoreWeights,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_posting_deserializes_from_sparse_json() {
        let job: JobPosting =
            serde_json::from_value(serde_json::json!({"title": "Rust Engineer"})).unwrap();

        assert_eq!(job.title, "Rust Engineer");
        assert!(job.company.is_none());
        assert!(job.salary_max.is_none());
        assert!(job.posted_at.is_none());
    }

    #[test]
    fn test_job_posting_roundtrip() {
        let mut job = JobPosting::new("Senior Python Engineer");
        job.company = Some("Acme".into());
        job.salary_max = Some(150_000);
        job.remote = Some(true);

        let value = serde_json::to_value(&job).unwrap();
        let back: JobPosting = serde_json::from_value(value).unwrap();

        assert_eq!(back.title, job.title);
        assert_eq!(back.company.as_deref(), Some("Acme"));
        assert_eq!(back.salary_max, Some(150_000));
        assert_eq!(back.remote, Some(true));
    }

    #[test]
    fn test_preferences_default_weights() {
        let prefs: UserPreferences = serde_json::from_value(serde_json::json!({
            "keywords": ["python"],
            "salary_min": 120000
        }))
        .unwrap();

        assert_eq!(prefs.weights, ScoreWeights::default());
        assert!(prefs.locations.is_empty());
    }
}
