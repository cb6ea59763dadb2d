//! Transport failure classification
//!
//! Maps a failed exchange onto exactly one `ErrorKind` with a human-readable
//! message. Classification is pure: the same failure always yields the same
//! record, and nothing here touches the coordinator or the credential store.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{ApiError, ErrorKind};

pub const NETWORK_ERROR_MESSAGE: &str = "Network error. Please check your connection.";
pub const AUTH_ERROR_MESSAGE: &str = "Authentication required.";
pub const VALIDATION_ERROR_MESSAGE: &str = "Please check the highlighted fields.";
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests. Please wait a moment and try again.";

/// A failed exchange, as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// No response arrived: connect error, timeout, or an unreadable body.
    NoResponse { message: String },
    /// The server answered with a non-success status.
    Status { status: u16, body: String },
}

/// Classify a failure into an `ApiError`.
///
/// - no response → `Network`
/// - 401 → `Auth` (not `handled`; renewal is the client's decision)
/// - 422 → `Validation`, with field errors when the body has them
/// - 400 with field errors → `Validation`, otherwise `Unknown`
/// - 429 → `RateLimit`
/// - anything else → `Unknown`, with the best server-provided text
pub fn classify(failure: &Failure) -> ApiError {
    let (status, body) = match failure {
        Failure::NoResponse { message } => {
            return ApiError::new(ErrorKind::Network, NETWORK_ERROR_MESSAGE.to_string())
                .with_cause(message);
        }
        Failure::Status { status, body } => (*status, body.as_str()),
    };

    let json: Option<Value> = serde_json::from_str(body).ok();
    let server_text = json.as_ref().and_then(server_message);
    let fields = json.as_ref().and_then(field_errors);

    match status {
        401 => ApiError::new(
            ErrorKind::Auth,
            server_text.unwrap_or_else(|| AUTH_ERROR_MESSAGE.to_string()),
        )
        .with_status(status),
        422 | 400 if status == 422 || fields.is_some() => {
            let err = ApiError::new(
                ErrorKind::Validation,
                server_text.unwrap_or_else(|| VALIDATION_ERROR_MESSAGE.to_string()),
            )
            .with_status(status);
            match fields {
                Some(fields) => err.with_field_errors(fields),
                None => err,
            }
        }
        429 => ApiError::new(
            ErrorKind::RateLimit,
            server_text.unwrap_or_else(|| RATE_LIMIT_MESSAGE.to_string()),
        )
        .with_status(status),
        _ => {
            let message = server_text
                .or_else(|| plain_text(body))
                .unwrap_or_else(|| format!("Request failed with status code {status}"));
            ApiError::new(ErrorKind::Unknown, message).with_status(status)
        }
    }
}

impl ApiError {
    /// Network errors keep the fixed user-facing message; the transport's
    /// own text is appended for logs.
    fn with_cause(mut self, cause: &str) -> Self {
        if !cause.is_empty() {
            self.message = format!("{} ({cause})", self.message);
        }
        self
    }
}

/// Best human-readable text in a JSON error body.
///
/// Looks at `message`, then `error` (string), then `error.message`.
fn server_message(body: &Value) -> Option<String> {
    let text = body
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| body.get("error").and_then(Value::as_str))
        .or_else(|| {
            body.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
        })?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Short non-JSON bodies (e.g. a proxy's "Bad Gateway") are used verbatim.
fn plain_text(body: &str) -> Option<String> {
    let text = body.trim();
    let looks_like_markup = text.starts_with('<') || text.starts_with('{');
    (!text.is_empty() && text.len() <= 200 && !looks_like_markup).then(|| text.to_string())
}

/// Field-level errors from an `errors` member.
///
/// Accepts an object (`{"email": "taken"}` or `{"email": ["taken", ...]}`)
/// or an array of objects naming the field in `field`, `path`, `property`
/// or `param` and the text in `message` or `msg`. The first message per
/// field wins.
pub fn field_errors(body: &Value) -> Option<BTreeMap<String, String>> {
    let mut fields = BTreeMap::new();
    match body.get("errors")? {
        Value::Object(map) => {
            for (field, value) in map {
                let message = match value {
                    Value::String(s) => Some(s.clone()),
                    Value::Array(items) => items.iter().find_map(|i| i.as_str().map(String::from)),
                    _ => None,
                };
                if let Some(message) = message {
                    fields.entry(field.clone()).or_insert(message);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                let field = ["field", "path", "property", "param"]
                    .iter()
                    .find_map(|k| item.get(*k).and_then(Value::as_str));
                let message = ["message", "msg"]
                    .iter()
                    .find_map(|k| item.get(*k).and_then(Value::as_str));
                if let (Some(field), Some(message)) = (field, message) {
                    fields
                        .entry(field.to_string())
                        .or_insert_with(|| message.to_string());
                }
            }
        }
        _ => {}
    }
    (!fields.is_empty()).then_some(fields)
}
