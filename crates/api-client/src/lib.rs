//! Authenticated HTTP client for the platform API
//!
//! Every request goes through one `ApiClient`, which attaches the stored
//! bearer token, renews it transparently when the server answers 401, and
//! turns every failure into a typed `ApiError`.
//!
//! Request lifecycle:
//! 1. Interceptor attaches `Authorization` unless the route is public
//! 2. Response 2xx → returned, or unwrapped from the `{success, data}` envelope
//! 3. Response 401 → `RefreshCoordinator` renews once for all concurrent
//!    failures, then each request is replayed a single time
//! 4. Renewal fails → credentials cleared, one session-expired event, every
//!    waiting request fails with the same `Auth` error
//! 5. Anything else → classified (`Network`, `Validation`, `RateLimit`, ...)

pub mod classify;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod interceptor;
pub mod metrics;
pub mod request;
pub mod routes;
pub mod service;

pub use classify::{Failure, classify};
pub use client::ApiClient;
pub use config::ClientConfig;
pub use coordinator::{HttpRenewer, Outcome, RefreshCoordinator, TokenRenewer};
pub use error::{ApiError, ErrorKind, Result};
pub use events::{AuthEvent, AuthEvents, AuthObserver};
pub use request::{ApiRequest, ApiResponse, MultipartPart, RequestBody};
pub use routes::{is_public, is_public_request};
pub use service::ApiEnvelope;
