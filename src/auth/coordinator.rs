//! Token Refresh Coordinator
//!
//! Hands out a valid access token to outgoing requests. When the token has
//! expired, or the server rejected it, exactly one refresh runs; every caller
//! that shows up meanwhile waits on that refresh and gets its outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::auth::{Credentials, TokenStore, REFRESH_TOKEN_KEY};
use crate::error::{NetError, Result};
use crate::events::{EventBus, Subscription};
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// Event name published when a session cannot be recovered
pub const SESSION_EXPIRED_EVENT: &str = "session_expired";
/// Event name published after a successful refresh
pub const SESSION_REFRESHED_EVENT: &str = "session_refreshed";

/// Default endpoint for exchanging a refresh token
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// Session lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Refreshed,
    /// Credentials were cleared; the UI should send the user to login
    Expired { reason: String },
}

/// Observable credential validity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    /// No access token stored and no failed refresh on record
    Unauthenticated,
    Valid,
    ExpiredIdle,
    Refreshing,
    RefreshFailed,
}

/// Body returned by the refresh endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Access token lifetime in seconds
    #[serde(default)]
    expires_in: Option<i64>,
}

enum RefreshSlot {
    Idle,
    InFlight(Vec<oneshot::Sender<Result<String>>>),
}

struct CoordinatorInner {
    store: Arc<dyn TokenStore>,
    transport: Arc<dyn Transport>,
    refresh_path: String,
    leeway: chrono::Duration,
    slot: Mutex<RefreshSlot>,
    failed: AtomicBool,
    events: EventBus<SessionEvent>,
}

// == Token Coordinator ==
/// Cloneable handle; clones share one refresh slot.
#[derive(Clone)]
pub struct TokenCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl std::fmt::Debug for TokenCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCoordinator")
            .field("refresh_path", &self.inner.refresh_path)
            .field("state", &self.state())
            .finish()
    }
}

impl TokenCoordinator {
    /// Coordinator with the default refresh path and leeway.
    ///
    /// # Arguments
    /// * `store` - Persistent credential storage
    /// * `transport` - Used only for the refresh call
    pub fn new(store: Arc<dyn TokenStore>, transport: Arc<dyn Transport>) -> Self {
        Self::builder(store, transport).build()
    }

    pub fn builder(store: Arc<dyn TokenStore>, transport: Arc<dyn Transport>) -> CoordinatorBuilder {
        CoordinatorBuilder {
            store,
            transport,
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            leeway: chrono::Duration::zero(),
            events: EventBus::new(),
        }
    }

    // == Access Token ==
    /// Returns a token fit to attach to a request.
    ///
    /// Fails with `NoAuthToken` without touching the network when nothing is
    /// stored, and with `SessionExpired` when a needed refresh fails.
    pub async fn access_token(&self) -> Result<String> {
        let credentials = Credentials::load(self.inner.store.as_ref()).ok_or(NetError::NoAuthToken)?;
        if !credentials.is_expired(Utc::now(), self.inner.leeway) {
            return Ok(credentials.access_token);
        }

        debug!("access token expired locally");
        self.join_or_start(None).await
    }

    /// Called after the server answered 401 for `rejected`. If another caller
    /// already replaced that token, the replacement is returned without a new
    /// refresh.
    pub async fn refresh_after_unauthorized(&self, rejected: &str) -> Result<String> {
        debug!("access token rejected by server");
        self.join_or_start(Some(rejected)).await
    }

    async fn join_or_start(&self, rejected: Option<&str>) -> Result<String> {
        let rx = {
            let mut slot = self.inner.lock();
            let (tx, rx) = oneshot::channel();
            match &mut *slot {
                RefreshSlot::InFlight(waiters) => {
                    debug!(waiters = waiters.len() + 1, "joining in-flight token refresh");
                    waiters.push(tx);
                }
                RefreshSlot::Idle => {
                    // Re-check under the lock: a refresh may have finished since the caller looked.
                    let current = Credentials::load(self.inner.store.as_ref()).ok_or(NetError::NoAuthToken)?;
                    let usable = !current.is_expired(Utc::now(), self.inner.leeway)
                        && rejected != Some(current.access_token.as_str());
                    if usable {
                        return Ok(current.access_token);
                    }

                    *slot = RefreshSlot::InFlight(vec![tx]);
                    self.spawn_refresh();
                }
            }
            rx
        };

        rx.await
            .unwrap_or_else(|_| Err(NetError::SessionExpired("token refresh was abandoned".to_string())))
    }

    /// The refresh runs in its own task so a caller that gives up cannot strand
    /// the others.
    fn spawn_refresh(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            // A panicking refresh still has to settle the slot and its waiters.
            let refresh = tokio::spawn({
                let inner = Arc::clone(&inner);
                async move { inner.perform_refresh().await }
            });
            let outcome = refresh.await.unwrap_or_else(|err| {
                Err(NetError::SessionExpired(format!("token refresh task failed: {}", err)))
            });

            match &outcome {
                Ok(_) => {
                    inner.failed.store(false, Ordering::SeqCst);
                    info!("access token refreshed");
                }
                Err(err) => {
                    Credentials::clear(inner.store.as_ref());
                    inner.failed.store(true, Ordering::SeqCst);
                    warn!(error = %err, "token refresh failed, credentials cleared");
                }
            }

            let waiters = match std::mem::replace(&mut *inner.lock(), RefreshSlot::Idle) {
                RefreshSlot::InFlight(waiters) => waiters,
                RefreshSlot::Idle => Vec::new(),
            };
            debug!(waiters = waiters.len(), "settling token refresh waiters");
            for tx in waiters {
                let _ = tx.send(outcome.clone());
            }

            match outcome {
                Ok(_) => {
                    inner.events.publish(SESSION_REFRESHED_EVENT, &SessionEvent::Refreshed);
                }
                Err(err) => {
                    let event = SessionEvent::Expired {
                        reason: err.to_string(),
                    };
                    inner.events.publish(SESSION_EXPIRED_EVENT, &event);
                }
            }
        });
    }

    // == State ==
    pub fn state(&self) -> CredentialState {
        if matches!(*self.inner.lock(), RefreshSlot::InFlight(_)) {
            return CredentialState::Refreshing;
        }
        match Credentials::load(self.inner.store.as_ref()) {
            Some(c) if c.is_expired(Utc::now(), self.inner.leeway) => CredentialState::ExpiredIdle,
            Some(_) => CredentialState::Valid,
            None if self.inner.failed.load(Ordering::SeqCst) => CredentialState::RefreshFailed,
            None => CredentialState::Unauthenticated,
        }
    }

    // == Credential Management ==
    /// Stores credentials after a login and resets a failed state.
    pub fn set_credentials(&self, credentials: &Credentials) {
        credentials.save(self.inner.store.as_ref());
        self.inner.failed.store(false, Ordering::SeqCst);
    }

    /// Removes stored credentials, e.g. on logout.
    pub fn clear_credentials(&self) {
        Credentials::clear(self.inner.store.as_ref());
    }

    pub fn credentials(&self) -> Option<Credentials> {
        Credentials::load(self.inner.store.as_ref())
    }

    pub fn events(&self) -> &EventBus<SessionEvent> {
        &self.inner.events
    }

    /// Subscribes to unrecoverable session expiry; the UI redirects to login here.
    pub fn on_session_expired<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(SESSION_EXPIRED_EVENT, handler)
    }
}

impl CoordinatorInner {
    fn lock(&self) -> MutexGuard<'_, RefreshSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn perform_refresh(&self) -> Result<String> {
        let refresh_token = self
            .store
            .get(REFRESH_TOKEN_KEY)
            .ok_or_else(|| NetError::SessionExpired("no refresh token stored".to_string()))?;

        let request = HttpRequest::new(Method::POST, self.refresh_path.clone())
            .with_body(Some(json!({ "refreshToken": refresh_token })));
        let response = self
            .transport
            .send(request)
            .await
            .and_then(HttpResponse::error_for_status)
            .map_err(|err| NetError::SessionExpired(err.to_string()))?;

        let body: RefreshResponse = serde_json::from_value(response.data)
            .map_err(|err| NetError::SessionExpired(format!("invalid refresh response: {}", err)))?;

        let credentials = Credentials {
            access_token: body.access_token,
            // Rotation is optional: keep the old refresh token when none comes back
            refresh_token: Some(body.refresh_token.unwrap_or(refresh_token)),
            expires_at: body
                .expires_in
                .and_then(chrono::Duration::try_seconds)
                // A lifetime past chrono's range is stored as no expiry
                .and_then(|lifetime| Utc::now().checked_add_signed(lifetime)),
        };
        credentials.save(self.store.as_ref());
        Ok(credentials.access_token)
    }
}

// == Builder ==
pub struct CoordinatorBuilder {
    store: Arc<dyn TokenStore>,
    transport: Arc<dyn Transport>,
    refresh_path: String,
    leeway: chrono::Duration,
    events: EventBus<SessionEvent>,
}

impl CoordinatorBuilder {
    pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    /// Treat tokens as expired this long before their recorded expiry.
    pub fn leeway(mut self, leeway: chrono::Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Publish session events on an existing bus.
    pub fn events(mut self, events: EventBus<SessionEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> TokenCoordinator {
        TokenCoordinator {
            inner: Arc::new(CoordinatorInner {
                store: self.store,
                transport: self.transport,
                refresh_path: self.refresh_path,
                leeway: self.leeway,
                slot: Mutex::new(RefreshSlot::Idle),
                failed: AtomicBool::new(false),
                events: self.events,
            }),
        }
    }
}
