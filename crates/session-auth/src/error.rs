//! Error types for credential storage and auth-service calls

/// Errors from credential storage and auth-service calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No response was received (connect failure, timeout, broken body).
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The auth service answered with a non-success status.
    #[error("auth service returned {status}: {body}")]
    Rejected { status: u16, body: String },

    /// A 2xx response that carries no usable token.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for session-auth operations.
pub type Result<T> = std::result::Result<T, Error>;
