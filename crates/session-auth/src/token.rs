//! Auth-service calls and token inspection
//!
//! The refresh endpoint is `POST {base}/auth/refresh-token` with body
//! `{"refreshToken": "..."}`. A usable response carries `accessToken` and may
//! carry a rotated `refreshToken`. Some deployments wrap the payload in a
//! `data` object, which is accepted too.
//!
//! Tokens are otherwise opaque. `token_expires_at` peeks at the `exp` claim of
//! a JWT-shaped token so callers can ask "is this obviously stale?" without
//! a round trip. The server stays the authority.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::REFRESH_TOKEN_PATH;
use crate::error::{Error, Result};

/// Body of a successful renewal.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    /// Present when the server rotates the refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

/// Body of a successful login or registration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub user: Option<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Exchange a refresh token for a new access token.
///
/// Any non-2xx status is `Rejected`; a 2xx without `accessToken`, or with
/// `success: false`, is `InvalidResponse`. Both end the session upstream.
pub async fn refresh_token(
    client: &reqwest::Client,
    base_url: &str,
    refresh: &str,
) -> Result<RefreshResponse> {
    let url = format!("{}{REFRESH_TOKEN_PATH}", base_url.trim_end_matches('/'));
    let response = client
        .post(&url)
        .json(&RefreshRequest {
            refresh_token: refresh,
        })
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let body = response
        .json::<Value>()
        .await
        .map_err(|e| Error::InvalidResponse(format!("refresh body is not JSON: {e}")))?;

    parse_refresh_body(body)
}

/// Pull a usable `RefreshResponse` out of a 2xx body.
fn parse_refresh_body(body: Value) -> Result<RefreshResponse> {
    let payload = match body.get("data") {
        Some(data) if body.get("accessToken").is_none() && data.is_object() => data.clone(),
        _ => body,
    };

    let parsed: RefreshResponse = serde_json::from_value(payload)
        .map_err(|e| Error::InvalidResponse(format!("missing accessToken: {e}")))?;

    if parsed.success == Some(false) {
        return Err(Error::InvalidResponse("server reported success=false".into()));
    }
    if parsed.access_token.is_empty() {
        return Err(Error::InvalidResponse("empty accessToken".into()));
    }
    Ok(parsed)
}

/// The `exp` claim (unix seconds) of a JWT-shaped token, if it has one.
pub fn token_expires_at(token: &str) -> Option<u64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("exp")?.as_u64()
}

/// Whether the token expires within `leeway_secs` of `now_secs`.
///
/// Tokens without a readable `exp` are never considered expired here.
pub fn is_expired(token: &str, now_secs: u64, leeway_secs: u64) -> bool {
    token_expires_at(token).is_some_and(|exp| exp <= now_secs.saturating_add(leeway_secs))
}
