//! Error types for the completion backends.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using the LLM error type.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Error type for completion calls.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Backend/API error from the provider (5xx, malformed envelope).
    #[error("Backend error: {0}")]
    Backend(String),

    /// Network/connectivity error (retryable).
    #[error("Network error: {0}")]
    Network(String),

    /// The request did not complete within its deadline (retryable).
    #[error("Request timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// The provider answered but produced no text (retryable).
    #[error("Empty response from {0}")]
    EmptyResponse(String),

    /// Configuration error (unknown backend, missing base URL, etc.).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid request parameters (4xx other than auth/rate limit).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Rate limit exceeded (retryable with backoff).
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Authentication failed.
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl LlmError {
    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::RateLimit {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Get the retry-after duration if this is a rate limit error.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Returns true if another attempt could succeed.
    ///
    /// Server-side 5xx failures count as transient; auth, config and request
    /// shape errors do not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::Timeout(_)
                | Self::EmptyResponse(_)
                | Self::RateLimit { .. }
                | Self::Backend(_)
        )
    }

    /// Short stable category name, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Backend(_) => "backend",
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::EmptyResponse(_) => "empty_response",
            Self::Config(_) => "config",
            Self::Serialization(_) => "serialization",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimit { .. } => "rate_limit",
            Self::Auth(_) => "auth",
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Network(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            LlmError::Network(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            LlmError::Serialization(err.to_string())
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::Serialization(err.to_string())
    }
}

/// Map a non-success HTTP status to an error category.
pub(crate) fn classify_status(
    status: u16,
    message: String,
    retry_after: Option<Duration>,
) -> LlmError {
    match status {
        401 | 403 => LlmError::Auth(message),
        408 => LlmError::Network(format!("HTTP 408: {}", message)),
        429 => LlmError::RateLimit {
            message,
            retry_after,
        },
        500..=599 => LlmError::Backend(format!("Server error ({}): {}", status, message)),
        _ => LlmError::InvalidRequest(format!("HTTP {}: {}", status, message)),
    }
}

/// Parse a Retry-After header value given in seconds.
pub(crate) fn parse_retry_after_header(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(LlmError::Network("reset".to_string()).is_retryable());
        assert!(LlmError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(LlmError::EmptyResponse("ollama".to_string()).is_retryable());
        assert!(LlmError::rate_limit("slow down").is_retryable());
        assert!(LlmError::Backend("HTTP 503".to_string()).is_retryable());
        assert!(!LlmError::Config("bad config".to_string()).is_retryable());
        assert!(!LlmError::Auth("unauthorized".to_string()).is_retryable());
        assert!(!LlmError::InvalidRequest("model not found".to_string()).is_retryable());
    }

    #[test]
    fn test_retry_after() {
        let err = LlmError::RateLimit {
            message: "busy".to_string(),
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
        assert_eq!(LlmError::Auth("x".to_string()).retry_after(), None);
    }

    #[test]
    fn test_parse_retry_after_header() {
        assert_eq!(parse_retry_after_header(" 12 "), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after_header("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(401, "no".into(), None), LlmError::Auth(_)));
        assert!(matches!(
            classify_status(429, "busy".into(), Some(Duration::from_secs(2))),
            LlmError::RateLimit { .. }
        ));
        assert!(matches!(classify_status(503, "down".into(), None), LlmError::Backend(_)));
        assert!(matches!(
            classify_status(404, "model 'x' not found".into(), None),
            LlmError::InvalidRequest(_)
        ));
    }

    #[test]
    fn test_timeout_display() {
        let err = LlmError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Request timed out after 1.5s");
    }

    #[test]
    fn test_kind() {
        assert_eq!(LlmError::rate_limit("x").kind(), "rate_limit");
        assert_eq!(LlmError::EmptyResponse("x".into()).kind(), "empty_response");
    }
}
