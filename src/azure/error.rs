//! Errors returned by remote collaborators (resource catalog, alerting platform, token endpoint)

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// 401/403, or the token endpoint refused the credential
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    /// 429 after retries were exhausted
    #[error("throttled by remote service")]
    Throttled,

    #[error("remote service returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    /// Transport-level failure (DNS, connect, TLS, reset)
    #[error("transport error: {0}")]
    Http(String),

    /// The bounded per-call timeout elapsed
    #[error("remote call timed out")]
    Timeout,

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether redelivering the work later could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Throttled | RemoteError::Http(_) | RemoteError::Timeout => true,
            RemoteError::Status { code, .. } => *code >= 500,
            RemoteError::Unauthorized(_)
            | RemoteError::NotFound
            | RemoteError::Conflict(_)
            | RemoteError::Decode(_) => false,
        }
    }

    /// Map a non-success HTTP status and its body to an error
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized(body),
            StatusCode::NOT_FOUND => RemoteError::NotFound,
            StatusCode::CONFLICT => RemoteError::Conflict(body),
            StatusCode::TOO_MANY_REQUESTS => RemoteError::Throttled,
            other => RemoteError::Status {
                code: other.as_u16(),
                body,
            },
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout
        } else if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else {
            RemoteError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            RemoteError::from_status(StatusCode::NOT_FOUND, String::new()),
            RemoteError::NotFound
        );
        assert_eq!(
            RemoteError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            RemoteError::Throttled
        );
        assert!(matches!(
            RemoteError::from_status(StatusCode::FORBIDDEN, "no role".to_string()),
            RemoteError::Unauthorized(body) if body == "no role"
        ));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(RemoteError::Timeout.is_retryable());
        assert!(RemoteError::Throttled.is_retryable());
        assert!(RemoteError::Status {
            code: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!RemoteError::Status {
            code: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!RemoteError::Unauthorized(String::new()).is_retryable());
        assert!(!RemoteError::NotFound.is_retryable());
    }
}
