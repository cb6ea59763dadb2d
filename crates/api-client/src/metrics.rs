//! Client metrics
//!
//! Emitted through the `metrics` facade; the embedding application chooses
//! the recorder. Without one these calls are no-ops.
//!
//! - `api_requests_total` (counter): label `status`
//! - `api_errors_total` (counter): label `kind`
//! - `api_token_refresh_total` (counter): label `outcome` (`success` | `failure`)

use crate::error::ErrorKind;

/// Record a completed exchange by HTTP status.
pub fn record_response(status: u16) {
    metrics::counter!("api_requests_total", "status" => status.to_string()).increment(1);
}

/// Record an error surfaced to a caller.
pub fn record_error(kind: ErrorKind) {
    metrics::counter!("api_errors_total", "kind" => kind.label()).increment(1);
}

/// Record the outcome of one renewal episode.
pub fn record_refresh(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!("api_token_refresh_total", "outcome" => outcome).increment(1);
}
