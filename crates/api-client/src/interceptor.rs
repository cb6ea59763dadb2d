//! Outgoing request preparation
//!
//! Runs on every attempt, including replays. Two rewrites:
//! 1. Non-public requests get `Authorization: Bearer <token>` when a token exists
//! 2. Multipart requests lose any explicit `Content-Type` so the transport can
//!    write one with the boundary parameter

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use session_auth::{ACCESS_TOKEN_KEY, CredentialStore};
use tracing::{debug, warn};

use crate::request::ApiRequest;
use crate::routes::is_public_request;

pub struct RequestInterceptor {
    store: Arc<CredentialStore>,
}

impl RequestInterceptor {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store }
    }

    /// Rewrite `request` in place and return the bearer token attached, if any.
    ///
    /// `token_override` is the token handed back by a settled renewal; it wins
    /// over the store so a replay uses exactly the credential it was resolved with.
    /// A missing token is not an error. The request goes out unauthenticated
    /// and the server decides.
    pub async fn prepare(
        &self,
        request: &mut ApiRequest,
        token_override: Option<&str>,
    ) -> Option<String> {
        if request.body.is_multipart() && request.headers.remove(CONTENT_TYPE).is_some() {
            debug!(path = %request.path, "dropped explicit content-type on multipart request");
        }

        if is_public_request(&request.method, &request.path) {
            request.headers.remove(AUTHORIZATION);
            return None;
        }

        let token = match token_override {
            Some(token) => Some(token.to_string()),
            None => self.store.read(ACCESS_TOKEN_KEY).await,
        };
        let Some(token) = token else {
            debug!(path = %request.path, "no access token, sending unauthenticated");
            return None;
        };

        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                request.headers.insert(AUTHORIZATION, value);
                Some(token)
            }
            Err(e) => {
                warn!(error = %e, "stored access token is not a valid header value, sending unauthenticated");
                None
            }
        }
    }
}
