//! Single-flight token renewal
//!
//! When a request comes back 401, its caller asks the coordinator for a fresh
//! access token. The coordinator guarantees that one renewal call is in flight
//! at a time, however many requests fail together:
//!
//! 1. First caller (Idle → Renewing): flag set, episode task spawned
//! 2. Callers arriving while Renewing: queued, suspended on a oneshot
//! 3. Episode settles: tokens written or cleared, one broadcast, queue resolved
//!    FIFO with the same outcome, then the triggering caller, then back to Idle
//!
//! The flag check-and-set happens under a std `Mutex` that is never held
//! across an `.await`. The episode runs on its own task so it settles even if
//! the caller that started it is dropped.
//!
//! A 401 can land after the episode that already replaced its token has
//! settled. Callers pass the settled-episode count they saw when the request
//! was prepared; if a newer episode has settled since, its outcome is reused
//! instead of starting another renewal.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::FutureExt;
use session_auth::{
    ACCESS_TOKEN_KEY, CredentialStore, REFRESH_TOKEN_KEY, RefreshResponse, SESSION_KEYS,
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::events::AuthEvents;
use crate::metrics;

/// What every caller of one episode receives: the new access token, or the
/// session-expired error.
pub type Outcome = Result<String, ApiError>;

/// Settles one pending caller. Invoked exactly once, under the state lock.
type Resolver = Box<dyn FnOnce(Outcome) + Send>;

/// Performs the renewal network call.
///
/// Uses `Pin<Box<dyn Future>>` so the coordinator can hold `Arc<dyn TokenRenewer>`.
pub trait TokenRenewer: Send + Sync {
    fn renew<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = session_auth::Result<RefreshResponse>> + Send + 'a>>;
}

/// Renews against `POST {base_url}/auth/refresh-token`.
pub struct HttpRenewer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRenewer {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

impl TokenRenewer for HttpRenewer {
    fn renew<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = session_auth::Result<RefreshResponse>> + Send + 'a>> {
        Box::pin(session_auth::refresh_token(
            &self.client,
            &self.base_url,
            refresh_token,
        ))
    }
}

/// Why an episode ended in the failure path. Logged, never surfaced: every
/// caller sees the same session-expired error.
#[derive(Debug, thiserror::Error)]
enum RenewalFailure {
    #[error("no refresh token stored")]
    NoRefreshToken,

    #[error("renewal timed out after {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Rejected(#[from] session_auth::Error),

    #[error("token renewer panicked")]
    Panicked,
}

struct PendingRequest {
    resolve: Resolver,
}

#[derive(Default)]
struct RefreshState {
    renewing: bool,
    /// Non-empty only while `renewing`.
    queue: VecDeque<PendingRequest>,
    /// Number of settled episodes.
    settled: u64,
    /// Outcome of the most recently settled episode.
    last: Option<Outcome>,
}

struct Inner {
    state: Mutex<RefreshState>,
    store: Arc<CredentialStore>,
    renewer: Arc<dyn TokenRenewer>,
    events: Arc<AuthEvents>,
    timeout: Duration,
}

/// Coordinates token renewal for every request issued through one client.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    /// `timeout` bounds the renewal call; expiry is a failed episode.
    pub fn new(
        store: Arc<CredentialStore>,
        renewer: Arc<dyn TokenRenewer>,
        events: Arc<AuthEvents>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RefreshState::default()),
                store,
                renewer,
                events,
                timeout,
            }),
        }
    }

    /// Obtain a fresh access token after a 401.
    ///
    /// `seen_episode` is `episode()` as read when the failed request was
    /// prepared. Resolves with the new token on success, or with the shared
    /// session-expired error once credentials have been cleared.
    pub async fn renew(&self, seen_episode: u64) -> Outcome {
        let (tx, rx) = oneshot::channel();
        let resolve: Resolver = Box::new(move |outcome| {
            // The caller may have been dropped; its replay is simply skipped.
            let _ = tx.send(outcome);
        });

        if let Some(outcome) = self.admit(seen_episode, resolve) {
            return outcome;
        }

        rx.await.unwrap_or_else(|_| Err(ApiError::session_expired()))
    }

    /// Number of settled renewal episodes.
    pub fn episode(&self) -> u64 {
        self.inner.lock().settled
    }

    pub fn is_renewing(&self) -> bool {
        self.inner.lock().renewing
    }

    /// Callers currently suspended on the in-flight renewal.
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// The check-and-set. Returns an outcome only when a newer episode has
    /// already settled; otherwise `resolve` is queued or becomes the trigger
    /// of a new episode.
    fn admit(&self, seen_episode: u64, resolve: Resolver) -> Option<Outcome> {
        let mut state = self.inner.lock();

        if state.renewing {
            state.queue.push_back(PendingRequest { resolve });
            debug!(queued = state.queue.len(), "renewal in flight, request queued");
            return None;
        }

        if state.settled > seen_episode {
            if let Some(last) = &state.last {
                debug!(
                    seen_episode,
                    episode = state.settled,
                    "renewal already settled since request was sent, reusing outcome"
                );
                return Some(last.clone());
            }
        }

        state.renewing = true;
        let episode = state.settled + 1;
        drop(state);

        info!(episode, "access token rejected, starting renewal");
        let inner = self.inner.clone();
        tokio::spawn(inner.run_episode(resolve));
        None
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn run_episode(self: Arc<Self>, trigger: Resolver) {
        let attempt = AssertUnwindSafe(self.obtain_token())
            .catch_unwind()
            .await
            .unwrap_or(Err(RenewalFailure::Panicked));

        let outcome = match attempt {
            Ok(token) => {
                info!("token renewal succeeded");
                metrics::record_refresh(true);
                self.broadcast(|events| events.credential_updated(&token));
                Ok(token)
            }
            Err(reason) => {
                warn!(reason = %reason, "token renewal failed, ending session");
                metrics::record_refresh(false);
                if let Err(e) = self.store.clear_all(SESSION_KEYS).await {
                    warn!(error = %e, "failed to clear credentials after renewal failure");
                }
                let error = ApiError::session_expired();
                self.broadcast(|events| events.session_expired(&error));
                Err(error)
            }
        };

        self.settle(outcome, trigger);
    }

    /// Observers are application code; a panic there must not skip `settle`.
    fn broadcast(&self, notify: impl FnOnce(&AuthEvents)) {
        if panic::catch_unwind(AssertUnwindSafe(|| notify(&self.events))).is_err() {
            warn!("auth observer panicked while handling a renewal outcome");
        }
    }

    async fn obtain_token(&self) -> Result<String, RenewalFailure> {
        let refresh = self
            .store
            .read(REFRESH_TOKEN_KEY)
            .await
            .ok_or(RenewalFailure::NoRefreshToken)?;

        let response = tokio::time::timeout(self.timeout, self.renewer.renew(&refresh))
            .await
            .map_err(|_| RenewalFailure::TimedOut(self.timeout))??;

        // A failed persist still leaves the new token in memory for this process.
        if let Err(e) = self
            .store
            .write(ACCESS_TOKEN_KEY, &response.access_token)
            .await
        {
            warn!(error = %e, "failed to persist renewed access token");
        }
        if let Some(rotated) = &response.refresh_token {
            if let Err(e) = self.store.write(REFRESH_TOKEN_KEY, rotated).await {
                warn!(error = %e, "failed to persist rotated refresh token");
            }
        }

        Ok(response.access_token)
    }

    /// Resolve the queue FIFO, then the trigger, then return to Idle, all
    /// under one lock so no new episode can interleave.
    fn settle(&self, outcome: Outcome, trigger: Resolver) {
        let mut state = self.lock();
        let queue = std::mem::take(&mut state.queue);
        let queued = queue.len();
        for pending in queue {
            (pending.resolve)(outcome.clone());
        }
        trigger(outcome.clone());

        state.settled += 1;
        state.last = Some(outcome);
        state.renewing = false;
        debug!(episode = state.settled, queued, "renewal episode settled");
    }
}
