//! Session lifecycle: sign-in, single-flight renewal, teardown.
//!
//! `Anonymous -> Authenticating -> Active -> Renewing -> (Active | Dead)`.
//! `Dead` is terminal; only a fresh [`SessionLifecycle::login`] leaves it.
//! Renewal is single-flight: however many concurrent requests observe an
//! expired token, exactly one refresh call goes out and every caller awaits
//! its outcome.

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::api::client::{Method, OutboundRequest, Transport};
use crate::api::error::ApiError;
use crate::models::{LoginResponse, RefreshResponse};

use super::session::Credential;
use super::store::TokenStore;

/// Capacity of the session event channel.
/// Events are low-rate; 16 absorbs a burst while an observer catches up.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Where the session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Active,
    Renewing,
    /// Renewal was rejected outright; only a fresh sign-in leaves this state.
    Dead,
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    SignedOut,
    /// The session died and a fresh sign-in is required. Emitted at most
    /// once per session, however many requests fail concurrently.
    SessionExpired,
    /// The access token lapses within the warning threshold.
    ExpiringSoon { remaining_secs: i64 },
}

type RenewalFuture = Shared<BoxFuture<'static, Result<Credential, ApiError>>>;

/// Orchestrates credential issuance, renewal and teardown.
///
/// Constructed once at app start; clones share state. The store and the
/// transport are injected, so tests run the whole lifecycle against scripted
/// responses.
#[derive(Clone)]
pub struct SessionLifecycle {
    inner: Arc<LifecycleInner>,
}

struct LifecycleInner {
    transport: Arc<dyn Transport>,
    store: TokenStore,
    base_url: String,
    state: Mutex<SessionState>,
    /// The in-flight renewal, if any. New callers attach to it instead of
    /// starting a second refresh.
    renewal: AsyncMutex<Option<RenewalFuture>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionLifecycle {
    /// Create a lifecycle over the given transport and store. A persisted,
    /// unexpired credential resumes the session as `Active`.
    pub fn new(
        transport: Arc<dyn Transport>,
        store: TokenStore,
        base_url: impl Into<String>,
    ) -> Self {
        let initial = if store.read().is_some() {
            SessionState::Active
        } else {
            SessionState::Anonymous
        };
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(LifecycleInner {
                transport,
                store,
                base_url: base_url.into(),
                state: Mutex::new(initial),
                renewal: AsyncMutex::new(None),
                events,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    /// Subscribe to session notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Sender half of the event channel, for wiring up the expiration
    /// watcher.
    pub fn events(&self) -> broadcast::Sender<SessionEvent> {
        self.inner.events.clone()
    }

    /// Sign in. On success the credential is stored and the session becomes
    /// `Active`; on rejection the server's reason is surfaced verbatim and
    /// the session stays `Anonymous`.
    pub async fn login(&self, email: &str, password: &str) -> Result<Credential, ApiError> {
        self.inner.set_state(SessionState::Authenticating);

        let request = OutboundRequest {
            method: Method::Post,
            url: format!("{}/auth/login", self.inner.base_url),
            bearer: None,
            body: Some(serde_json::json!({ "email": email, "password": password })),
        };

        let response = match self.inner.transport.send(request).await {
            Ok(response) => response,
            Err(transport) => {
                self.inner.set_state(SessionState::Anonymous);
                return Err(transport.into());
            }
        };

        if !response.is_success() {
            self.inner.set_state(SessionState::Anonymous);
            return Err(ApiError::from_status(response.status, &response.body_text()));
        }

        let parsed: LoginResponse = match serde_json::from_slice(&response.body) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.inner.set_state(SessionState::Anonymous);
                return Err(ApiError::InvalidResponse(format!(
                    "Failed to parse login response: {e}"
                )));
            }
        };

        let credential =
            Credential::issued_now(parsed.access_token, parsed.refresh_token, parsed.user);
        self.inner.store.write(credential.clone());
        self.inner.set_state(SessionState::Active);
        let _ = self.inner.events.send(SessionEvent::SignedIn);
        info!("Signed in");
        Ok(credential)
    }

    /// Return a usable credential, renewing if the stored one has lapsed.
    ///
    /// While `expires_at` is in the future this performs no network call at
    /// all - the common, zero-cost path.
    pub async fn ensure_fresh(&self) -> Result<Credential, ApiError> {
        match self.inner.store.read() {
            Some(credential) if !credential.is_expired() => Ok(credential),
            Some(_) => self.renew().await,
            None => Err(match self.state() {
                SessionState::Dead => ApiError::SessionExpired,
                _ => ApiError::Unauthorized("Not signed in".to_string()),
            }),
        }
    }

    /// Sign out unconditionally. Safe to call from any state, including
    /// `Dead`; concurrent and repeated calls produce one notification.
    pub fn logout(&self) {
        let previous = {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, SessionState::Anonymous)
        };
        self.inner.store.clear();
        if previous != SessionState::Anonymous {
            let _ = self.inner.events.send(SessionEvent::SignedOut);
            info!("Signed out");
        }
    }

    /// Renewal path for a request the server rejected with 401 despite a
    /// locally-fresh token. If a concurrent caller already rotated the
    /// token, the rotated credential is returned without another refresh.
    pub(crate) async fn renew_after_rejection(
        &self,
        rejected_access_token: &str,
    ) -> Result<Credential, ApiError> {
        if let Some(current) = self.inner.store.read() {
            if current.access_token != rejected_access_token {
                return Ok(current);
            }
        }
        self.renew().await
    }

    /// Terminal teardown driven by the pipeline: a 401 that renewal could
    /// not cure. Idempotent - concurrent failures produce one teardown.
    pub(crate) fn invalidate(&self) {
        self.inner.kill_session();
    }

    /// Single-flight renewal: attach to the in-flight refresh if one exists,
    /// otherwise start one and publish it for later arrivals. Every waiter
    /// observes the same outcome.
    async fn renew(&self) -> Result<Credential, ApiError> {
        let renewal = {
            let mut slot = self.inner.renewal.lock().await;
            match slot.as_ref() {
                Some(in_flight) => in_flight.clone(),
                None => {
                    let inner = Arc::clone(&self.inner);
                    let fresh: RenewalFuture =
                        async move { LifecycleInner::run_renewal(inner).await }
                            .boxed()
                            .shared();
                    *slot = Some(fresh.clone());
                    fresh
                }
            }
        };
        renewal.await
    }
}

impl LifecycleInner {
    async fn run_renewal(inner: Arc<LifecycleInner>) -> Result<Credential, ApiError> {
        let result = inner.renew_once().await;
        // Release the in-flight handle so the next expiry starts a new
        // refresh instead of replaying a settled one.
        *inner.renewal.lock().await = None;
        result
    }

    async fn renew_once(&self) -> Result<Credential, ApiError> {
        let current = match self.store.read() {
            Some(credential) => credential,
            // Cleared underneath us by a concurrent logout.
            None => return Err(ApiError::SessionExpired),
        };

        self.set_state(SessionState::Renewing);
        debug!("Renewing access token");

        let request = OutboundRequest {
            method: Method::Post,
            url: format!("{}/auth/refresh-token", self.base_url),
            bearer: Some(current.refresh_token.clone()),
            body: Some(serde_json::json!({ "refreshToken": current.refresh_token })),
        };

        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(transport) => {
                // No response reached us - the session is still recoverable.
                self.set_state(SessionState::Active);
                return Err(transport.into());
            }
        };

        if response.status == 401 {
            // The refresh token itself was rejected - unrecoverable.
            warn!("Refresh token rejected; terminating session");
            self.kill_session();
            return Err(ApiError::SessionExpired);
        }

        if !response.is_success() {
            // Transient refresh failure: the session survives and a later
            // call may try again.
            self.set_state(SessionState::Active);
            return Err(ApiError::from_status(response.status, &response.body_text()));
        }

        let parsed: RefreshResponse = match serde_json::from_slice(&response.body) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.set_state(SessionState::Active);
                return Err(ApiError::InvalidResponse(format!(
                    "Failed to parse refresh response: {e}"
                )));
            }
        };

        let refresh_token = parsed.refresh_token.unwrap_or(current.refresh_token);
        let credential =
            Credential::issued_now(parsed.access_token, refresh_token, current.identity);
        self.store.write(credential.clone());
        self.set_state(SessionState::Active);
        debug!(expires_at = %credential.expires_at, "Access token renewed");
        Ok(credential)
    }

    /// Terminal teardown: store wiped, `Dead`, one expiry notification.
    fn kill_session(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == SessionState::Dead {
                return;
            }
            *state = SessionState::Dead;
        }
        self.store.clear();
        let _ = self.events.send(SessionEvent::SessionExpired);
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        count_events, credential_expiring_in, expired_credential, lifecycle_with, ScriptedTransport,
        Step, LOGIN_OK, REFRESH_OK,
    };
    use chrono::Utc;

    #[tokio::test]
    async fn test_login_stores_credential_with_fixed_lifetime() {
        let transport = ScriptedTransport::new().login(vec![Step::ok(LOGIN_OK)]).build();
        let store = TokenStore::in_memory();
        let session = lifecycle_with(transport.clone(), store.clone());
        let mut events = session.subscribe();

        let before = Utc::now();
        let credential = session.login("admin@example.com", "hunter2").await.expect("login");

        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(credential.access_token, "access-1");
        let lifetime = credential.expires_at - before;
        assert!(lifetime.num_minutes() >= 14 && lifetime.num_minutes() <= 15);
        assert!(store.read().is_some());
        assert_eq!(events.try_recv().expect("event"), SessionEvent::SignedIn);
    }

    #[tokio::test]
    async fn test_login_failure_surfaces_server_reason_verbatim() {
        let transport = ScriptedTransport::new()
            .login(vec![Step::status(401, r#"{"statusCode":401,"message":"Invalid credentials"}"#)])
            .build();
        let store = TokenStore::in_memory();
        let session = lifecycle_with(transport, store.clone());

        let err = session.login("admin@example.com", "wrong").await.expect_err("rejected");
        assert_eq!(err.to_string(), "Invalid credentials");
        assert_eq!(session.state(), SessionState::Anonymous);
        assert!(store.read().is_none());
    }

    #[tokio::test]
    async fn test_ensure_fresh_fast_path_makes_no_network_calls() {
        let transport = ScriptedTransport::new().build();
        let store = TokenStore::in_memory();
        store.write(credential_expiring_in(600));
        let session = lifecycle_with(transport.clone(), store);

        let credential = session.ensure_fresh().await.expect("fresh");
        assert_eq!(credential.access_token, "access-0");
        assert_eq!(transport.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_credential_triggers_exactly_one_refresh() {
        let transport = ScriptedTransport::new().refresh(vec![Step::ok(REFRESH_OK)]).build();
        let store = TokenStore::in_memory();
        store.write(expired_credential());
        let session = lifecycle_with(transport.clone(), store.clone());

        let credential = session.ensure_fresh().await.expect("renewed");
        assert_eq!(credential.access_token, "access-2");
        assert_eq!(credential.refresh_token, "refresh-2");
        assert_eq!(transport.refresh_count(), 1);
        assert_eq!(session.state(), SessionState::Active);
        // The rotation is visible to later readers.
        assert_eq!(store.read().expect("stored").access_token, "access-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_renewals_share_one_refresh_call() {
        let transport = ScriptedTransport::new()
            .refresh(vec![Step::ok(REFRESH_OK)])
            .refresh_delay(std::time::Duration::from_millis(50))
            .build();
        let store = TokenStore::in_memory();
        store.write(expired_credential());
        let session = lifecycle_with(transport.clone(), store);

        let outcomes = futures::future::join_all(
            (0..8).map(|_| session.ensure_fresh()),
        )
        .await;

        assert_eq!(transport.refresh_count(), 1);
        for outcome in outcomes {
            assert_eq!(outcome.expect("renewed").access_token, "access-2");
        }
    }

    #[tokio::test]
    async fn test_refresh_rejection_kills_session_and_notifies_once() {
        let transport = ScriptedTransport::new()
            .refresh(vec![Step::status(401, "{}")])
            .build();
        let store = TokenStore::in_memory();
        store.write(expired_credential());
        let session = lifecycle_with(transport, store.clone());
        let mut events = session.subscribe();

        let err = session.ensure_fresh().await.expect_err("dead");
        assert!(matches!(err, ApiError::SessionExpired));
        assert_eq!(session.state(), SessionState::Dead);
        assert!(store.read().is_none());
        assert_eq!(count_events(&mut events, &SessionEvent::SessionExpired), 1);

        // A later call fails the same way without resurrecting the session.
        let err = session.ensure_fresh().await.expect_err("still dead");
        assert!(matches!(err, ApiError::SessionExpired));
        assert_eq!(count_events(&mut events, &SessionEvent::SessionExpired), 0);
    }

    #[tokio::test]
    async fn test_transient_refresh_failure_keeps_session_recoverable() {
        let transport = ScriptedTransport::new()
            .refresh(vec![Step::status(503, "{}"), Step::ok(REFRESH_OK)])
            .build();
        let store = TokenStore::in_memory();
        store.write(expired_credential());
        let session = lifecycle_with(transport.clone(), store.clone());

        let err = session.ensure_fresh().await.expect_err("transient");
        assert!(matches!(err, ApiError::Server { status: 503, .. }));
        assert_eq!(session.state(), SessionState::Active);
        assert!(store.read().is_some());

        // The next call starts a new refresh and succeeds.
        let credential = session.ensure_fresh().await.expect("renewed");
        assert_eq!(credential.access_token, "access-2");
        assert_eq!(transport.refresh_count(), 2);
    }

    #[tokio::test]
    async fn test_refresh_keeps_old_token_when_server_does_not_rotate() {
        let transport = ScriptedTransport::new()
            .refresh(vec![Step::ok(r#"{"accessToken":"access-2"}"#)])
            .build();
        let store = TokenStore::in_memory();
        store.write(expired_credential());
        let session = lifecycle_with(transport, store);

        let credential = session.ensure_fresh().await.expect("renewed");
        assert_eq!(credential.access_token, "access-2");
        assert_eq!(credential.refresh_token, "refresh-0");
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let transport = ScriptedTransport::new().login(vec![Step::ok(LOGIN_OK)]).build();
        let store = TokenStore::in_memory();
        let session = lifecycle_with(transport, store.clone());
        session.login("admin@example.com", "hunter2").await.expect("login");
        let mut events = session.subscribe();

        session.logout();
        session.logout();

        assert_eq!(session.state(), SessionState::Anonymous);
        assert!(store.read().is_none());
        assert_eq!(count_events(&mut events, &SessionEvent::SignedOut), 1);
    }

    #[tokio::test]
    async fn test_ensure_fresh_without_session() {
        let transport = ScriptedTransport::new().build();
        let session = lifecycle_with(transport, TokenStore::in_memory());
        let err = session.ensure_fresh().await.expect_err("anonymous");
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }
}
