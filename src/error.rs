use thiserror::Error;

/// Errors raised by underlying fetch operations against a job source.
///
/// The resilience layer treats these as opaque: every variant is retried
/// uniformly and every variant counts against the circuit breaker's
/// failure window.
#[derive(Error, Debug, Clone)]
pub enum AppError {
    /// HTTP request failed (fetching a listing page or API endpoint).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Source answered with a non-success status code.
    #[error("HTTP {status_code} from source")]
    StatusError { status_code: u16 },

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Source signalled rate limiting (429 or equivalent).
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Response body could not be parsed into job records.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

/// A configuration value was rejected at construction time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        assert_eq!(
            AppError::StatusError { status_code: 503 }.to_string(),
            "HTTP 503 from source"
        );
        assert_eq!(
            AppError::Timeout(30).to_string(),
            "Request timed out after 30 seconds"
        );
        assert_eq!(
            ConfigError("max_attempts must be >= 1".into()).to_string(),
            "invalid configuration: max_attempts must be >= 1"
        );
    }
}
