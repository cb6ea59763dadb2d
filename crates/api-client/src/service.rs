//! Service wrapper
//!
//! Domain services never touch the transport. They call `ApiClient::fetch`
//! (or its get/post/... shorthands), which decodes the body with
//! `envelope()` and passes it through `unwrap()`. That single choke point is
//! what makes the refresh coordinator's guarantees hold for every call site.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ApiError, ErrorKind, Result};

/// The `{success, data, message}` wrapper most endpoints answer with.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: Option<bool>,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Turn a decoded result into the data or a classified error.
///
/// Errors pass through unchanged. An envelope with `success: false` or with
/// no `data` becomes `Unknown`, carrying the server's message when present.
pub fn unwrap<T>(result: Result<ApiEnvelope<T>>) -> Result<T> {
    let envelope = result?;
    let message = || {
        envelope
            .message
            .clone()
            .unwrap_or_else(|| "The server returned no data.".to_string())
    };
    if envelope.success == Some(false) {
        return Err(ApiError::new(ErrorKind::Unknown, message()));
    }
    match envelope.data {
        Some(data) => Ok(data),
        None => Err(ApiError::new(ErrorKind::Unknown, message())),
    }
}

/// Decode a 2xx body into an envelope.
///
/// Bodies that are objects with a `data` or `success` member are treated as
/// envelopes; anything else (including an empty body) is the data itself.
pub fn envelope<T: DeserializeOwned>(body: &[u8]) -> Result<ApiEnvelope<T>> {
    let value: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(body).map_err(|e| decode_error(&e))?
    };

    let wrapped = value
        .as_object()
        .is_some_and(|o| o.contains_key("data") || o.contains_key("success"));

    if wrapped {
        serde_json::from_value(value).map_err(|e| decode_error(&e))
    } else {
        let data = serde_json::from_value(value).map_err(|e| decode_error(&e))?;
        Ok(ApiEnvelope {
            success: None,
            data: Some(data),
            message: None,
        })
    }
}

fn decode_error(e: &serde_json::Error) -> ApiError {
    ApiError::new(ErrorKind::Unknown, format!("invalid response body: {e}"))
}
