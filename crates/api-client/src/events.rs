//! Session event broadcasting
//!
//! The HTTP layer must be able to tell session-holding code "the token
//! changed" or "the session is over" without depending on it. At startup the
//! application registers at most one `AuthObserver`. With none registered,
//! events go out on a broadcast channel that any number of listeners may
//! subscribe to.
//!
//! Events are fire-and-forget: a send with no listeners is not an error.

use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::debug;

use crate::error::ApiError;

/// Capacity of the fallback channel. Slow listeners see `Lagged`, never block us.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Direct subscriber installed by session-holding code.
///
/// Callbacks run on the task that settled the renewal, so they must not block
/// and must not issue requests through the client synchronously.
pub trait AuthObserver: Send + Sync {
    fn on_credential_updated(&self, access_token: &str);
    fn on_session_expired(&self, error: &ApiError);
}

/// Event published on the fallback channel.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    CredentialUpdated { access_token: String },
    SessionExpired { error: ApiError },
}

pub struct AuthEvents {
    observer: RwLock<Option<Arc<dyn AuthObserver>>>,
    channel: broadcast::Sender<AuthEvent>,
}

impl AuthEvents {
    pub fn new() -> Self {
        let (channel, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            observer: RwLock::new(None),
            channel,
        }
    }

    /// Install the observer, replacing any earlier one.
    pub fn register(&self, observer: Arc<dyn AuthObserver>) {
        *self.observer.write().unwrap_or_else(|e| e.into_inner()) = Some(observer);
        debug!("auth observer registered");
    }

    /// Remove the observer; events fall back to the broadcast channel.
    pub fn unregister(&self) {
        *self.observer.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Listen on the fallback channel.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.channel.subscribe()
    }

    pub fn credential_updated(&self, access_token: &str) {
        match self.current_observer() {
            Some(observer) => observer.on_credential_updated(access_token),
            None => self.publish(AuthEvent::CredentialUpdated {
                access_token: access_token.to_string(),
            }),
        }
    }

    pub fn session_expired(&self, error: &ApiError) {
        match self.current_observer() {
            Some(observer) => observer.on_session_expired(error),
            None => self.publish(AuthEvent::SessionExpired {
                error: error.clone(),
            }),
        }
    }

    // Cloned out so the lock is not held while the observer runs.
    fn current_observer(&self) -> Option<Arc<dyn AuthObserver>> {
        self.observer
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn publish(&self, event: AuthEvent) {
        let listeners = self.channel.send(event).unwrap_or(0);
        debug!(listeners, "published auth event");
    }
}

impl Default for AuthEvents {
    fn default() -> Self {
        Self::new()
    }
}
