//! Typed errors for LLM operations
//!
//! Lets the dispatch loop tell the user *why* a turn failed (bad key, quota,
//! outage) without string matching.

use thiserror::Error;

/// LLM operation errors with typed variants
#[derive(Debug, Error)]
pub enum LlmError {
    /// API key rejected (HTTP 401/403)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Quota exceeded (HTTP 429)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Malformed request (HTTP 400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Server-side error (HTTP 5xx)
    #[error("Service error: {0}")]
    ServiceError(String),

    /// Connection refused, DNS failure, timeout
    #[error("Network error: {0}")]
    Network(String),

    /// The provider answered 2xx but the body was not what we expected
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl LlmError {
    /// Errors a user can fix by waiting and asking again
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited(_) | LlmError::ServiceError(_) | LlmError::Network(_)
        )
    }

    /// Convert HTTP status code and error text into typed LlmError
    pub fn from_http_status(status: reqwest::StatusCode, error_text: String) -> Self {
        match status.as_u16() {
            401 | 403 => LlmError::Unauthorized(error_text),
            429 => LlmError::RateLimited(error_text),
            400 => LlmError::BadRequest(error_text),
            500..=599 => LlmError::ServiceError(error_text),
            _ => LlmError::Other(anyhow::anyhow!("HTTP {}: {}", status, error_text)),
        }
    }

    /// Convert network/connection errors into typed LlmError
    pub fn from_network_error(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Network(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            LlmError::Network(format!("Connection failed: {}", e))
        } else if e.is_decode() {
            LlmError::InvalidResponse(e.to_string())
        } else if let Some(status) = e.status() {
            Self::from_http_status(status, e.to_string())
        } else {
            LlmError::Other(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_http_status() {
        let err = LlmError::from_http_status(
            reqwest::StatusCode::UNAUTHORIZED,
            "Invalid key".to_string(),
        );
        assert!(matches!(err, LlmError::Unauthorized(_)));

        let err = LlmError::from_http_status(reqwest::StatusCode::FORBIDDEN, "denied".to_string());
        assert!(matches!(err, LlmError::Unauthorized(_)));

        let err = LlmError::from_http_status(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "Quota exceeded".to_string(),
        );
        assert!(matches!(err, LlmError::RateLimited(_)));

        let err =
            LlmError::from_http_status(reqwest::StatusCode::BAD_REQUEST, "Bad request".to_string());
        assert!(matches!(err, LlmError::BadRequest(_)));

        let err = LlmError::from_http_status(
            reqwest::StatusCode::SERVICE_UNAVAILABLE,
            "overloaded".to_string(),
        );
        assert!(matches!(err, LlmError::ServiceError(_)));

        let err = LlmError::from_http_status(reqwest::StatusCode::NOT_FOUND, "no model".to_string());
        assert!(matches!(err, LlmError::Other(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(LlmError::RateLimited("q".to_string()).is_transient());
        assert!(LlmError::Network("down".to_string()).is_transient());
        assert!(!LlmError::Unauthorized("key".to_string()).is_transient());
        assert!(!LlmError::InvalidResponse("junk".to_string()).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = LlmError::RateLimited("quota exceeded".to_string());
        assert_eq!(err.to_string(), "Rate limited: quota exceeded");
    }
}
