//! Canonical error taxonomy for the scraper.
//!
//! Every fallible operation in the crate surfaces a [`ScrapeError`], a tagged
//! (kind, message, status) triple. Classification and propagation decisions
//! key off [`ErrorKind`] only; the message and status code are diagnostic.

use std::fmt;

use thiserror::Error;

/// Classification of a scraper error.
///
/// The kind drives every retry and exit-code decision in the pipeline:
/// `Network`, `RateLimit`, and `ServerError` are retryable; everything else
/// terminates the enclosing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport or DNS failure (no HTTP status observed).
    Network,
    /// Server rate limiting (HTTP 429).
    RateLimit,
    /// Authentication required (HTTP 401, or a requires-login response body).
    Auth,
    /// Resource does not exist (HTTP 404).
    NotFound,
    /// Response or durable state could not be decoded.
    Parsing,
    /// Server-side failure (HTTP 5xx).
    ServerError,
    /// Operation was cancelled before completion.
    Canceled,
    /// Any other failure (unclassified HTTP status, internal invariant).
    Unknown,
}

impl ErrorKind {
    /// Returns whether errors of this kind are worth retrying.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::ServerError)
    }

    /// Returns the storage/log representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::Auth => "auth",
            Self::NotFound => "not_found",
            Self::Parsing => "parsing",
            Self::ServerError => "server_error",
            Self::Canceled => "canceled",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error type used throughout the scraper.
///
/// Carries the [`ErrorKind`], a human-readable message, the HTTP status that
/// produced it (0 when no response was observed), and the raw `Retry-After`
/// header value when the server supplied one on a 429.
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct ScrapeError {
    kind: ErrorKind,
    message: String,
    status: u16,
    retry_after: Option<String>,
}

impl ScrapeError {
    /// Creates an error with an explicit kind and message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: 0,
            retry_after: None,
        }
    }

    /// Creates an error classified from an HTTP status code.
    ///
    /// Mapping: 429 → RateLimit, 401 → Auth, 404 → NotFound, ≥500 →
    /// ServerError, any other ≥400 → Unknown.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            429 => ErrorKind::RateLimit,
            401 => ErrorKind::Auth,
            404 => ErrorKind::NotFound,
            s if s >= 500 => ErrorKind::ServerError,
            _ => ErrorKind::Unknown,
        };
        Self {
            kind,
            message: message.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates a network (transport) error. Status is recorded as 0.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    /// Creates an authentication error.
    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Auth,
            message: message.into(),
            status: 401,
            retry_after: None,
        }
    }

    /// Creates a parsing error.
    #[must_use]
    pub fn parsing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parsing, message)
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Canceled, message)
    }

    /// Attaches the raw `Retry-After` header value from a 429 response.
    #[must_use]
    pub fn with_retry_after(mut self, value: Option<String>) -> Self {
        self.retry_after = value;
        self
    }

    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the diagnostic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the observed HTTP status code (0 when none).
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Returns the raw `Retry-After` header value, if the server sent one.
    #[must_use]
    pub fn retry_after(&self) -> Option<&str> {
        self.retry_after.as_deref()
    }

    /// Shorthand for `self.kind().is_retryable()`.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<serde_json::Error> for ScrapeError {
    fn from(err: serde_json::Error) -> Self {
        Self::parsing(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Status Classification Tests ====================

    #[test]
    fn test_from_status_429_is_rate_limit() {
        let err = ScrapeError::from_status(429, "slow down");
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert_eq!(err.status(), 429);
    }

    #[test]
    fn test_from_status_401_is_auth() {
        let err = ScrapeError::from_status(401, "login required");
        assert_eq!(err.kind(), ErrorKind::Auth);
    }

    #[test]
    fn test_from_status_404_is_not_found() {
        let err = ScrapeError::from_status(404, "no such user");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_from_status_5xx_is_server_error() {
        for status in [500, 502, 503, 504, 599] {
            let err = ScrapeError::from_status(status, "boom");
            assert_eq!(err.kind(), ErrorKind::ServerError, "status {status}");
        }
    }

    #[test]
    fn test_from_status_other_4xx_is_unknown() {
        for status in [400, 403, 410, 418] {
            let err = ScrapeError::from_status(status, "odd");
            assert_eq!(err.kind(), ErrorKind::Unknown, "status {status}");
        }
    }

    #[test]
    fn test_network_error_has_zero_status() {
        let err = ScrapeError::network("connection refused");
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(err.status(), 0);
    }

    // ==================== Retryability Tests ====================

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::Network.is_retryable());
        assert!(ErrorKind::RateLimit.is_retryable());
        assert!(ErrorKind::ServerError.is_retryable());
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(!ErrorKind::Auth.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::Parsing.is_retryable());
        assert!(!ErrorKind::Canceled.is_retryable());
        assert!(!ErrorKind::Unknown.is_retryable());
    }

    // ==================== Display Tests ====================

    #[test]
    fn test_display_includes_kind_and_message() {
        let err = ScrapeError::from_status(429, "too many requests");
        let msg = err.to_string();
        assert!(msg.contains("rate_limit"), "missing kind in: {msg}");
        assert!(msg.contains("too many requests"), "missing message in: {msg}");
    }

    #[test]
    fn test_retry_after_round_trip() {
        let err = ScrapeError::from_status(429, "wait").with_retry_after(Some("120".to_string()));
        assert_eq!(err.retry_after(), Some("120"));
    }
}
