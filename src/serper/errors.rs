//! Error types for the search API client.

use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchError {
    #[error("search request timed out after {0:?}")]
    Timeout(Duration),

    #[error("search transport error: {0}")]
    Transport(String),

    #[error("search API returned HTTP {status}: {detail}")]
    Status {
        status: u16,
        detail: String,
        /// Credits billed for the failed call, when the error body carried
        /// a parseable count.
        credits: Option<i64>,
    },

    #[error("search API returned a non-JSON body (HTTP {status})")]
    MalformedBody { status: u16 },

    #[error("SERPER_API_KEY is not configured")]
    MissingApiKey,
}

impl SearchError {
    /// Whether the failure class is worth another attempt.
    ///
    /// Timeouts, transport failures, 429, and 5xx are transient; any other
    /// 4xx and malformed bodies are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || (500..=599).contains(status),
            Self::MalformedBody { .. } | Self::MissingApiKey => false,
        }
    }

    /// The HTTP status observed, when the request got that far.
    pub fn api_status(&self) -> Option<i32> {
        match self {
            Self::Status { status, .. } | Self::MalformedBody { status } => Some(*status as i32),
            _ => None,
        }
    }

    /// Credits billed despite the failure, when the API reported any.
    pub fn credits(&self) -> Option<i64> {
        match self {
            Self::Status { credits, .. } => *credits,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> SearchError {
        SearchError::Status {
            status: code,
            detail: String::new(),
            credits: None,
        }
    }

    #[test]
    fn transient_classes() {
        assert!(SearchError::Timeout(Duration::from_secs(30)).is_transient());
        assert!(SearchError::Transport("connection reset".into()).is_transient());
        assert!(status(429).is_transient());
        assert!(status(500).is_transient());
        assert!(status(503).is_transient());
    }

    #[test]
    fn permanent_classes() {
        assert!(!status(400).is_transient());
        assert!(!status(403).is_transient());
        assert!(!status(404).is_transient());
        assert!(!SearchError::MalformedBody { status: 200 }.is_transient());
        assert!(!SearchError::MissingApiKey.is_transient());
    }

    #[test]
    fn api_status_is_preserved() {
        assert_eq!(status(429).api_status(), Some(429));
        assert_eq!(SearchError::MalformedBody { status: 200 }.api_status(), Some(200));
        assert_eq!(SearchError::Timeout(Duration::from_secs(1)).api_status(), None);
    }

    #[test]
    fn billed_credits_survive_failures() {
        let err = SearchError::Status {
            status: 429,
            detail: "rate limited".into(),
            credits: Some(1),
        };
        assert_eq!(err.credits(), Some(1));
        assert_eq!(status(500).credits(), None);
        assert_eq!(SearchError::Timeout(Duration::from_secs(1)).credits(), None);
    }
}
