//! Shared test fixtures: a scripted transport and canned credentials.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::broadcast;

use crate::api::client::{OutboundRequest, RawResponse, Transport, TransportError};
use crate::api::pipeline::RequestPipeline;
use crate::auth::lifecycle::{SessionEvent, SessionLifecycle};
use crate::auth::session::Credential;
use crate::auth::store::TokenStore;
use crate::models::UserIdentity;

pub(crate) const BASE_URL: &str = "http://test";

pub(crate) const LOGIN_OK: &str = r#"{"accessToken":"access-1","refreshToken":"refresh-1","user":{"id":"u-1","email":"admin@example.com","name":"Admin","roles":["admin"],"isEmailVerified":true}}"#;

pub(crate) const REFRESH_OK: &str = r#"{"accessToken":"access-2","refreshToken":"refresh-2"}"#;

/// One scripted transport outcome.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Respond { status: u16, body: String },
    Fail { message: String },
}

impl Step {
    pub(crate) fn ok(body: &str) -> Self {
        Step::Respond {
            status: 200,
            body: body.to_string(),
        }
    }

    pub(crate) fn status(status: u16, body: &str) -> Self {
        Step::Respond {
            status,
            body: body.to_string(),
        }
    }

    pub(crate) fn fail() -> Self {
        Step::Fail {
            message: "connection refused".to_string(),
        }
    }
}

/// Transport that answers from scripted queues. Auth endpoints are keyed by
/// path so tests can count login/refresh traffic separately from data
/// traffic.
pub(crate) struct ScriptedTransport {
    data_steps: Mutex<VecDeque<Step>>,
    refresh_steps: Mutex<VecDeque<Step>>,
    login_steps: Mutex<VecDeque<Step>>,
    default_data: Option<Step>,
    refresh_delay: Duration,
    data_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    login_calls: AtomicUsize,
    data_bearers: Mutex<Vec<Option<String>>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self {
            data_steps: Mutex::new(VecDeque::new()),
            refresh_steps: Mutex::new(VecDeque::new()),
            login_steps: Mutex::new(VecDeque::new()),
            default_data: None,
            refresh_delay: Duration::ZERO,
            data_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            login_calls: AtomicUsize::new(0),
            data_bearers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn data(self, steps: Vec<Step>) -> Self {
        *self.data_steps.lock().unwrap() = steps.into();
        self
    }

    pub(crate) fn refresh(self, steps: Vec<Step>) -> Self {
        *self.refresh_steps.lock().unwrap() = steps.into();
        self
    }

    pub(crate) fn login(self, steps: Vec<Step>) -> Self {
        *self.login_steps.lock().unwrap() = steps.into();
        self
    }

    /// Answer for data requests once the scripted queue is empty.
    pub(crate) fn default_data(mut self, step: Step) -> Self {
        self.default_data = Some(step);
        self
    }

    /// Delay before answering refresh calls, so concurrent callers pile up
    /// on the in-flight renewal.
    pub(crate) fn refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub(crate) fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub(crate) fn data_count(&self) -> usize {
        self.data_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub(crate) fn login_count(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    /// Bearer tokens attached to data requests, in order.
    pub(crate) fn data_bearers(&self) -> Vec<Option<String>> {
        self.data_bearers.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: OutboundRequest) -> BoxFuture<'static, Result<RawResponse, TransportError>> {
        let (step, delay) = if request.url.ends_with("/auth/refresh-token") {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            let step = self
                .refresh_steps
                .lock()
                .unwrap()
                .pop_front()
                .expect("no scripted refresh response left");
            (step, self.refresh_delay)
        } else if request.url.ends_with("/auth/login") {
            self.login_calls.fetch_add(1, Ordering::SeqCst);
            let step = self
                .login_steps
                .lock()
                .unwrap()
                .pop_front()
                .expect("no scripted login response left");
            (step, Duration::ZERO)
        } else {
            self.data_calls.fetch_add(1, Ordering::SeqCst);
            self.data_bearers.lock().unwrap().push(request.bearer.clone());
            let step = self
                .data_steps
                .lock()
                .unwrap()
                .pop_front()
                .or_else(|| self.default_data.clone())
                .expect("no scripted data response left");
            (step, Duration::ZERO)
        };

        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match step {
                Step::Respond { status, body } => Ok(RawResponse {
                    status,
                    body: body.into_bytes(),
                }),
                Step::Fail { message } => Err(TransportError {
                    message,
                    timed_out: false,
                }),
            }
        })
    }
}

pub(crate) fn sample_identity() -> UserIdentity {
    UserIdentity {
        id: "u-1".to_string(),
        email: "admin@example.com".to_string(),
        name: Some("Admin".to_string()),
        roles: vec!["admin".to_string()],
        email_verified: true,
    }
}

pub(crate) fn credential_expiring_in(secs: i64) -> Credential {
    Credential {
        access_token: "access-0".to_string(),
        refresh_token: "refresh-0".to_string(),
        expires_at: Utc::now() + chrono::Duration::seconds(secs),
        identity: sample_identity(),
    }
}

pub(crate) fn expired_credential() -> Credential {
    credential_expiring_in(-60)
}

pub(crate) fn lifecycle_with(
    transport: Arc<ScriptedTransport>,
    store: TokenStore,
) -> SessionLifecycle {
    SessionLifecycle::new(transport, store, BASE_URL)
}

pub(crate) fn pipeline_with(
    transport: Arc<ScriptedTransport>,
    session: SessionLifecycle,
) -> RequestPipeline {
    RequestPipeline::new(transport, session, BASE_URL)
}

/// Drain every event currently queued on `rx`, counting those equal to
/// `target`.
pub(crate) fn count_events(rx: &mut broadcast::Receiver<SessionEvent>, target: &SessionEvent) -> usize {
    let mut count = 0;
    while let Ok(event) = rx.try_recv() {
        if event == *target {
            count += 1;
        }
    }
    count
}
