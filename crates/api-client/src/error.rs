//! Caller-facing error record
//!
//! Every failure that leaves the client is an `ApiError` with exactly one
//! `ErrorKind`. The record is `Clone` because a failed renewal hands the same
//! session-expired error to every caller that was waiting on it.

use std::collections::BTreeMap;
use std::fmt;

/// Message attached to the error every caller sees when renewal fails.
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";

/// Closed error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No response received. The caller may retry; the client never does.
    Network,
    /// Field-level rejection (400/422). Never retried.
    Validation,
    /// Session invalid. Triggers one renewal; terminal if that fails.
    Auth,
    /// 429, surfaced after a fixed cooldown. Never retried.
    RateLimit,
    /// Everything else, surfaced verbatim.
    Unknown,
}

impl ErrorKind {
    /// Label for metrics and structured logs.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Validation => "validation",
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "NetworkError",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Auth => "AuthError",
            ErrorKind::RateLimit => "RateLimitError",
            ErrorKind::Unknown => "UnknownError",
        };
        f.write_str(name)
    }
}

/// A classified failure with a human-readable message.
///
/// `handled` is set on errors the refresh coordinator already broadcast, so
/// session-holding code does not log the user out a second time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub field_errors: Option<BTreeMap<String, String>>,
    pub status: Option<u16>,
    pub handled: bool,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            field_errors: None,
            status: None,
            handled: false,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_field_errors(mut self, field_errors: BTreeMap<String, String>) -> Self {
        self.field_errors = Some(field_errors);
        self
    }

    /// The terminal error produced when a renewal episode fails.
    pub fn session_expired() -> Self {
        Self {
            kind: ErrorKind::Auth,
            message: SESSION_EXPIRED_MESSAGE.to_string(),
            field_errors: None,
            status: Some(401),
            handled: true,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        self.kind == ErrorKind::Auth && self.handled
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ApiError>;
