//! Authenticated API client
//!
//! `ApiClient::send` is the only path to the transport. Per logical call:
//! 1. Clone the caller's request and run the interceptor (bearer, multipart)
//! 2. Transmit; a 2xx response is returned as-is
//! 3. A 401 on a non-public route, with no retry spent yet, goes to the
//!    refresh coordinator; on success the request is replayed once with the
//!    token it was resolved with
//! 4. Anything else is classified; 429 waits out the cooldown first

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use common::Secret;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde::de::DeserializeOwned;
use session_auth::{
    ACCESS_TOKEN_KEY, CredentialStore, LOGIN_PATH, LoginResponse, REFRESH_TOKEN_KEY,
    SESSION_KEYS, USER_KEY,
};
use tracing::{debug, info, instrument, warn};

use crate::classify::{Failure, classify};
use crate::config::ClientConfig;
use crate::coordinator::{HttpRenewer, RefreshCoordinator, TokenRenewer};
use crate::error::{ApiError, ErrorKind, Result};
use crate::events::AuthEvents;
use crate::interceptor::RequestInterceptor;
use crate::request::{ApiRequest, ApiResponse, MultipartPart, RequestBody, RequestContext};
use crate::routes::is_public_request;
use crate::{metrics, service};

/// One attempt: a 2xx response, or a failure still to be classified.
type Exchange = std::result::Result<ApiResponse, Failure>;

pub struct ApiClient {
    http: reqwest::Client,
    config: ClientConfig,
    store: Arc<CredentialStore>,
    interceptor: RequestInterceptor,
    coordinator: RefreshCoordinator,
    events: Arc<AuthEvents>,
}

impl ApiClient {
    /// Build a client whose renewals go to `{base_url}/auth/refresh-token`.
    pub fn new(config: ClientConfig, store: Arc<CredentialStore>) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        let renewer = Arc::new(HttpRenewer::new(http.clone(), config.base_url.clone()));
        Ok(Self::with_renewer(config, store, http, renewer))
    }

    /// Build a client with a custom renewal strategy.
    pub fn with_renewer(
        config: ClientConfig,
        store: Arc<CredentialStore>,
        http: reqwest::Client,
        renewer: Arc<dyn TokenRenewer>,
    ) -> Self {
        let events = Arc::new(AuthEvents::new());
        let coordinator =
            RefreshCoordinator::new(store.clone(), renewer, events.clone(), config.timeout);
        Self {
            http,
            interceptor: RequestInterceptor::new(store.clone()),
            store,
            coordinator,
            events,
            config,
        }
    }

    /// Where session-holding code registers for credential/session events.
    pub fn events(&self) -> &AuthEvents {
        &self.events
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send a request and return the raw 2xx response.
    #[instrument(skip_all, fields(request_id = tracing::field::Empty, method = %request.method, path = %request.path))]
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let mut ctx = RequestContext::new();
        tracing::Span::current().record("request_id", tracing::field::display(ctx.id.as_simple()));
        let mut token_override: Option<String> = None;

        loop {
            let mut outgoing = request.clone();
            ctx.episode = self.coordinator.episode();
            self.interceptor
                .prepare(&mut outgoing, token_override.as_deref())
                .await;

            let failure = match self.transmit(outgoing).await? {
                Ok(response) => return Ok(response),
                Err(failure) => failure,
            };

            let unauthorized = matches!(failure, Failure::Status { status: 401, .. });
            if unauthorized
                && ctx.can_retry()
                && !is_public_request(&request.method, &request.path)
            {
                ctx.retries += 1;
                match self.coordinator.renew(ctx.episode).await {
                    Ok(token) => {
                        debug!(retries = ctx.retries, "replaying request with renewed token");
                        token_override = Some(token);
                        continue;
                    }
                    Err(error) => {
                        metrics::record_error(error.kind);
                        return Err(error);
                    }
                }
            }

            let error = classify(&failure);
            if error.kind == ErrorKind::RateLimit {
                warn!(
                    backoff_ms = self.config.rate_limit_backoff.as_millis() as u64,
                    "rate limited, cooling down before surfacing"
                );
                tokio::time::sleep(self.config.rate_limit_backoff).await;
            } else {
                debug!(kind = error.kind.label(), status = ?error.status, "request failed");
            }
            metrics::record_error(error.kind);
            return Err(error);
        }
    }

    /// Send a request and decode its body through the service wrapper.
    pub async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let response = self.send(request).await;
        service::unwrap(response.and_then(|r| service::envelope(&r.body)))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.fetch(ApiRequest::get(path)).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.fetch(ApiRequest::post(path).json(to_json(body)?)).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.fetch(ApiRequest::put(path).json(to_json(body)?)).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.fetch(ApiRequest::patch(path).json(to_json(body)?)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.fetch(ApiRequest::delete(path)).await
    }

    /// POST a multipart form (photos, documents).
    pub async fn upload<T: DeserializeOwned>(
        &self,
        path: &str,
        parts: Vec<MultipartPart>,
    ) -> Result<T> {
        self.fetch(ApiRequest::post(path).multipart(parts)).await
    }

    /// Email/password login. Stores the credential pair and the user profile.
    pub async fn login(&self, email: &str, password: &Secret<String>) -> Result<LoginResponse> {
        let body = serde_json::json!({ "email": email, "password": password.expose() });
        let session: LoginResponse = self.fetch(ApiRequest::post(LOGIN_PATH).json(body)).await?;
        self.persist_session(&session).await?;
        info!("logged in");
        Ok(session)
    }

    /// End the session locally. No event is broadcast; the caller initiated it.
    pub async fn logout(&self) -> Result<()> {
        self.store
            .clear_all(SESSION_KEYS)
            .await
            .map_err(storage_error)?;
        info!("logged out");
        Ok(())
    }

    /// Whether an access token is stored and not past its `exp` claim.
    pub async fn is_authenticated(&self) -> bool {
        let Some(token) = self.store.read(ACCESS_TOKEN_KEY).await else {
            return false;
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        !session_auth::is_expired(&token, now, 0)
    }

    async fn persist_session(&self, session: &LoginResponse) -> Result<()> {
        self.store
            .write(ACCESS_TOKEN_KEY, &session.access_token)
            .await
            .map_err(storage_error)?;
        self.store
            .write(REFRESH_TOKEN_KEY, &session.refresh_token)
            .await
            .map_err(storage_error)?;
        if let Some(user) = &session.user {
            self.store
                .write(USER_KEY, &user.to_string())
                .await
                .map_err(storage_error)?;
        }
        Ok(())
    }

    /// Put one attempt on the wire and read the whole body.
    ///
    /// The outer `Result` is for requests that cannot be built at all.
    async fn transmit(&self, request: ApiRequest) -> Result<Exchange> {
        let url = self.config.url_for(&request.path);
        let mut builder = self
            .http
            .request(request.method, url)
            .headers(request.headers);
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart(parts) => builder.multipart(build_form(parts)?),
        };

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, timeout = e.is_timeout(), "no response from server");
                return Ok(Err(Failure::NoResponse {
                    message: transport_message(&e),
                }));
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = match response.bytes().await {
            Ok(body) => body.to_vec(),
            Err(e) => {
                warn!(error = %e, %status, "failed to read response body");
                return Ok(Err(Failure::NoResponse {
                    message: transport_message(&e),
                }));
            }
        };
        metrics::record_response(status.as_u16());

        if status.is_success() {
            Ok(Ok(ApiResponse {
                status,
                headers,
                body,
            }))
        } else {
            Ok(Err(Failure::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            }))
        }
    }
}

fn build_form(parts: Vec<MultipartPart>) -> Result<Form> {
    let mut form = Form::new();
    for part in parts {
        let mut body = Part::bytes(part.data);
        if let Some(file_name) = part.file_name {
            body = body.file_name(file_name);
        }
        if let Some(content_type) = &part.content_type {
            body = body.mime_str(content_type).map_err(|e| {
                ApiError::new(
                    ErrorKind::Unknown,
                    format!("invalid content type for part {}: {e}", part.name),
                )
            })?;
        }
        form = form.part(part.name, body);
    }
    Ok(form)
}

fn transport_message(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else {
        e.to_string()
    }
}

fn to_json<B: Serialize + ?Sized>(body: &B) -> Result<serde_json::Value> {
    serde_json::to_value(body).map_err(|e| {
        ApiError::new(
            ErrorKind::Unknown,
            format!("request body is not serializable: {e}"),
        )
    })
}

fn storage_error(e: session_auth::Error) -> ApiError {
    ApiError::new(
        ErrorKind::Unknown,
        format!("failed to update stored credentials: {e}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::AuthEvent;
    use axum::Json;
    use axum::extract::{Request, State};
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tokio::net::TcpListener;

    /// Fake API: accepts only `Bearer T2`, renews to T2/R2.
    struct Backend {
        refresh_calls: AtomicUsize,
        refresh_status: u16,
        refresh_delay: Duration,
        hits: Mutex<Vec<Hit>>,
    }

    #[derive(Debug, Clone)]
    struct Hit {
        path: String,
        authorization: Option<String>,
        content_types: Vec<String>,
    }

    impl Backend {
        fn new(refresh_status: u16) -> Arc<Self> {
            Arc::new(Self {
                refresh_calls: AtomicUsize::new(0),
                refresh_status,
                refresh_delay: Duration::from_millis(200),
                hits: Mutex::new(Vec::new()),
            })
        }

        fn refresh_calls(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }

        fn hits_for(&self, path: &str) -> Vec<Hit> {
            self.hits
                .lock()
                .unwrap()
                .iter()
                .filter(|h| h.path == path)
                .cloned()
                .collect()
        }
    }

    async fn handle(State(backend): State<Arc<Backend>>, request: Request) -> Response {
        let path = request.uri().path().to_string();
        let authorization = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_types = request
            .headers()
            .get_all(CONTENT_TYPE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        backend.hits.lock().unwrap().push(Hit {
            path: path.clone(),
            authorization: authorization.clone(),
            content_types,
        });

        match path.as_str() {
            "/auth/refresh-token" => {
                backend.refresh_calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(backend.refresh_delay).await;
                if backend.refresh_status != 200 {
                    let status = StatusCode::from_u16(backend.refresh_status).unwrap();
                    return (status, "refresh failed").into_response();
                }
                Json(json!({ "success": true, "accessToken": "T2", "refreshToken": "R2" }))
                    .into_response()
            }
            "/auth/login" => Json(json!({
                "success": true,
                "data": { "accessToken": "T1", "refreshToken": "R1", "user": { "id": "u1" } }
            }))
            .into_response(),
            "/health" | "/events" => Json(json!({ "status": "ok" })).into_response(),
            "/busy" => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "message": "Too many requests" })),
            )
                .into_response(),
            "/profile" => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "message": "Validation failed", "errors": { "bio": "too long" } })),
            )
                .into_response(),
            "/admin" => (StatusCode::UNAUTHORIZED, Json(json!({ "message": "forbidden" })))
                .into_response(),
            _ if authorization.as_deref() == Some("Bearer T2") => {
                Json(json!({ "success": true, "data": { "path": path } })).into_response()
            }
            _ => (StatusCode::UNAUTHORIZED, Json(json!({ "message": "jwt expired" })))
                .into_response(),
        }
    }

    async fn start_backend(backend: Arc<Backend>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().fallback(handle).with_state(backend);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn client_for(base: &str, access: Option<&str>) -> ApiClient {
        let store = Arc::new(CredentialStore::in_memory());
        if let Some(access) = access {
            store.write(ACCESS_TOKEN_KEY, access).await.unwrap();
            store.write(REFRESH_TOKEN_KEY, "R1").await.unwrap();
        }
        let mut config = ClientConfig::new(base);
        config.timeout = Duration::from_secs(5);
        config.rate_limit_backoff = Duration::from_millis(50);
        ApiClient::new(config, store).unwrap()
    }

    #[tokio::test]
    async fn expired_token_renews_once_and_replays_all() {
        let backend = Backend::new(200);
        let base = start_backend(backend.clone()).await;
        let client = client_for(&base, Some("T1")).await;
        let mut events = client.events().subscribe();

        let (a, b, c) = tokio::join!(
            client.get::<Value>("/bookings"),
            client.get::<Value>("/user/suggestions"),
            client.get::<Value>("/matches/stats"),
        );

        assert_eq!(a.unwrap()["path"], "/bookings");
        assert_eq!(b.unwrap()["path"], "/user/suggestions");
        assert_eq!(c.unwrap()["path"], "/matches/stats");
        assert_eq!(backend.refresh_calls(), 1);

        for path in ["/bookings", "/user/suggestions", "/matches/stats"] {
            let hits = backend.hits_for(path);
            assert_eq!(hits.len(), 2, "{path} must be sent once and replayed once");
            assert_eq!(hits[0].authorization.as_deref(), Some("Bearer T1"));
            assert_eq!(hits[1].authorization.as_deref(), Some("Bearer T2"));
        }

        let refresh = backend.hits_for("/auth/refresh-token");
        assert!(refresh[0].authorization.is_none());
        assert_eq!(
            client.store().read(ACCESS_TOKEN_KEY).await.as_deref(),
            Some("T2")
        );
        assert_eq!(
            client.store().read(REFRESH_TOKEN_KEY).await.as_deref(),
            Some("R2")
        );
        assert!(matches!(
            events.try_recv().unwrap(),
            AuthEvent::CredentialUpdated { .. }
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_renewal_expires_every_caller() {
        let backend = Backend::new(500);
        let base = start_backend(backend.clone()).await;
        let client = client_for(&base, Some("T1")).await;
        let mut events = client.events().subscribe();

        let (a, b, c) = tokio::join!(
            client.get::<Value>("/bookings"),
            client.get::<Value>("/user/suggestions"),
            client.get::<Value>("/matches/stats"),
        );

        for result in [a, b, c] {
            let err = result.unwrap_err();
            assert_eq!(err.kind, ErrorKind::Auth);
            assert_eq!(err.status, Some(401), "must not leak the renewal's 500");
            assert!(err.handled);
        }
        assert_eq!(backend.refresh_calls(), 1);
        assert!(client.store().is_empty().await);
        assert!(matches!(
            events.try_recv().unwrap(),
            AuthEvent::SessionExpired { .. }
        ));
        assert!(events.try_recv().is_err(), "exactly one session-expired broadcast");
    }

    #[tokio::test]
    async fn public_routes_skip_authorization() {
        let backend = Backend::new(200);
        let base = start_backend(backend.clone()).await;
        let client = client_for(&base, Some("T1")).await;

        client.get::<Value>("/health").await.unwrap();
        client.get::<Value>("/events").await.unwrap();

        assert!(backend.hits_for("/health")[0].authorization.is_none());
        assert!(backend.hits_for("/events")[0].authorization.is_none());
    }

    #[tokio::test]
    async fn unauthorized_public_route_is_not_renewed() {
        let backend = Backend::new(200);
        let base = start_backend(backend.clone()).await;
        let client = client_for(&base, Some("T1")).await;

        let err = client.get::<Value>("/auth/status").await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Auth);
        assert!(!err.handled);
        assert_eq!(backend.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn replay_is_attempted_only_once() {
        let backend = Backend::new(200);
        let base = start_backend(backend.clone()).await;
        let client = client_for(&base, Some("T1")).await;

        let err = client.get::<Value>("/admin").await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Auth);
        assert_eq!(err.message, "forbidden");
        assert!(!err.handled);
        assert_eq!(backend.refresh_calls(), 1);
        assert_eq!(backend.hits_for("/admin").len(), 2);
    }

    #[tokio::test]
    async fn login_stores_session() {
        let backend = Backend::new(200);
        let base = start_backend(backend.clone()).await;
        let client = client_for(&base, None).await;
        assert!(!client.is_authenticated().await);

        let password = Secret::new(String::from("correct horse"));
        let session = client.login("ana@example.com", &password).await.unwrap();

        assert_eq!(session.access_token, "T1");
        assert!(backend.hits_for("/auth/login")[0].authorization.is_none());
        let store = client.store();
        assert_eq!(store.read(ACCESS_TOKEN_KEY).await.as_deref(), Some("T1"));
        assert_eq!(store.read(REFRESH_TOKEN_KEY).await.as_deref(), Some("R1"));
        assert_eq!(store.read(USER_KEY).await.as_deref(), Some(r#"{"id":"u1"}"#));
        assert!(client.is_authenticated().await);

        client.logout().await.unwrap();
        assert!(store.is_empty().await);
        assert!(!client.is_authenticated().await);
    }

    #[tokio::test]
    async fn rate_limit_waits_then_surfaces_without_retry() {
        let backend = Backend::new(200);
        let base = start_backend(backend.clone()).await;
        let client = client_for(&base, Some("T2")).await;

        let started = Instant::now();
        let err = client.get::<Value>("/busy").await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert_eq!(err.status, Some(429));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(backend.hits_for("/busy").len(), 1);
        assert_eq!(backend.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn validation_errors_carry_fields() {
        let backend = Backend::new(200);
        let base = start_backend(backend.clone()).await;
        let client = client_for(&base, Some("T2")).await;

        let err = client
            .patch::<Value, _>("/profile", &json!({ "bio": "..." }))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.field_errors.unwrap()["bio"], "too long");
    }

    #[tokio::test]
    async fn multipart_upload_gets_transport_boundary() {
        let backend = Backend::new(200);
        let base = start_backend(backend.clone()).await;
        let client = client_for(&base, Some("T2")).await;

        let request = ApiRequest::post("/user/photos")
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .multipart(vec![
                MultipartPart::text("caption", "sunset"),
                MultipartPart::file("photo", "sunset.jpg", "image/jpeg", vec![0xff, 0xd8, 0xff]),
            ]);
        let data: Value = client.fetch(request).await.unwrap();

        assert_eq!(data["path"], "/user/photos");
        let hit = &backend.hits_for("/user/photos")[0];
        assert_eq!(hit.content_types.len(), 1, "got {:?}", hit.content_types);
        assert!(hit.content_types[0].starts_with("multipart/form-data; boundary="));
        assert_eq!(hit.authorization.as_deref(), Some("Bearer T2"));
    }

    #[tokio::test]
    async fn unreachable_server_is_network_error() {
        let client = client_for("http://127.0.0.1:1", Some("T1")).await;

        let err = client.get::<Value>("/bookings").await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Network);
        assert!(err.status.is_none());
    }
}
