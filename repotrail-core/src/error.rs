//! Error types for repotrail-core

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Main error type for the repotrail-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Repository name is not of the form `owner/repo`
    #[error("invalid repository name {0:?}, expected format is owner/repository")]
    InvalidRepositoryName(String),

    /// Repository is already tracked locally
    #[error("repository is already tracked: {0}")]
    AlreadyTracked(String),

    /// Repository does not exist upstream or is not accessible
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    /// Network failure or non-success status from the upstream API
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Upstream rejected the request because the rate limit was hit
    #[error("upstream rate limit exceeded{}", .reset_at.map(|t| format!(" (resets at {})", t.to_rfc3339())).unwrap_or_default())]
    UpstreamThrottled { reset_at: Option<DateTime<Utc>> },

    /// Upstream body could not be parsed
    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),

    /// Database error
    #[error("database error: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// Unique constraint violation, classified at the storage boundary
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Record not found in local storage
    #[error("record not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error came from talking to the upstream API.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Error::UpstreamUnavailable(_)
                | Error::UpstreamThrottled { .. }
                | Error::MalformedResponse(_)
        )
    }
}

/// Result type alias for repotrail-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttled_display() {
        let err = Error::UpstreamThrottled { reset_at: None };
        assert_eq!(err.to_string(), "upstream rate limit exceeded");

        let reset = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let err = Error::UpstreamThrottled {
            reset_at: Some(reset),
        };
        assert!(err.to_string().contains("2024-05-01T10:00:00+00:00"));
    }

    #[test]
    fn test_is_upstream() {
        assert!(Error::UpstreamUnavailable("boom".into()).is_upstream());
        assert!(Error::MalformedResponse("bad".into()).is_upstream());
        assert!(!Error::NotFound("x".into()).is_upstream());
    }
}
