//! The authenticated request pipeline.
//!
//! Every dashboard call goes through [`RequestPipeline::execute`]: the
//! pipeline keeps the access token fresh, attaches it, classifies failures
//! and retries the ones that are safe to retry. Retries suspend only the
//! request that is retrying; other in-flight requests are untouched.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::auth::lifecycle::SessionLifecycle;

use super::client::{Method, OutboundRequest, RawResponse, Transport};
use super::error::{ApiError, ErrorCategory};

/// Maximum number of retries after the initial attempt.
/// Two retries (three attempts total) clears transient blips without
/// holding a spinner for long.
const MAX_RETRIES: u32 = 2;

/// Initial backoff delay in milliseconds.
/// 500ms is short enough to be invisible when the first retry succeeds.
const BASE_DELAY_MS: u64 = 500;

/// Specification of one outbound request. Idempotency is fixed here, at
/// construction, from the verb alone.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    method: Method,
    path: String,
    body: Option<Value>,
    deadline: Option<Duration>,
}

impl RequestSpec {
    fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
            deadline: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path, None)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path, Some(body))
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path, Some(body))
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Patch, path, Some(body))
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path, None)
    }

    /// Abort the whole request, retries included, once `deadline` elapses.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn is_idempotent(&self) -> bool {
        self.method.is_idempotent()
    }
}

/// Retry decisions and backoff arithmetic, independent of any transport.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay: Duration::from_millis(BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Whether the attempt numbered `attempt` (zero-based), having failed
    /// with `error`, may be retried.
    ///
    /// A mutating request that received any response is never replayed: the
    /// server may already have applied it. One that produced no response at
    /// all cannot have been applied, so it stays eligible.
    pub fn should_retry(&self, error: &ApiError, attempt: u32, idempotent: bool) -> bool {
        if attempt >= self.max_retries {
            return false;
        }
        if !error.is_retryable() {
            return false;
        }
        if !idempotent && error.received_response() {
            return false;
        }
        true
    }

    /// Exponential backoff before the retry that follows `attempt`.
    /// Rate-limit responses back off one power further, to respect the
    /// server's pressure signal more conservatively than generic failures.
    pub fn delay(&self, error: &ApiError, attempt: u32) -> Duration {
        let exponent = match error.category() {
            ErrorCategory::RateLimit => attempt + 1,
            _ => attempt,
        };
        self.base_delay * 2u32.pow(exponent)
    }
}

/// Wraps every outbound call with credential refresh, failure
/// classification and bounded retries.
#[derive(Clone)]
pub struct RequestPipeline {
    transport: Arc<dyn Transport>,
    session: SessionLifecycle,
    policy: RetryPolicy,
    base_url: String,
}

impl RequestPipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        session: SessionLifecycle,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            session,
            policy: RetryPolicy::default(),
            base_url: base_url.into(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Execute a request and decode its JSON body. Empty bodies (204)
    /// decode as `null`, so callers can ask for `()` or `Option<T>`.
    pub async fn execute<T: DeserializeOwned>(&self, spec: RequestSpec) -> Result<T, ApiError> {
        let response = self.execute_raw(&spec).await?;
        let bytes: &[u8] = if response.body.is_empty() {
            b"null"
        } else {
            &response.body
        };
        serde_json::from_slice(bytes)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response body: {e}")))
    }

    async fn execute_raw(&self, spec: &RequestSpec) -> Result<RawResponse, ApiError> {
        match spec.deadline {
            Some(deadline) => tokio::time::timeout(deadline, self.run(spec))
                .await
                .map_err(|_| ApiError::DeadlineExceeded)?,
            None => self.run(spec).await,
        }
    }

    async fn run(&self, spec: &RequestSpec) -> Result<RawResponse, ApiError> {
        let mut attempt: u32 = 0;
        let mut replayed_after_renewal = false;

        loop {
            let credential = self.session.ensure_fresh().await?;

            let request = OutboundRequest {
                method: spec.method,
                url: format!("{}{}", self.base_url, spec.path),
                bearer: Some(credential.access_token.clone()),
                body: spec.body.clone(),
            };

            let error = match self.transport.send(request).await {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => ApiError::from_status(response.status, &response.body_text()),
                Err(transport) => ApiError::from(transport),
            };

            if let ApiError::Unauthorized(_) = error {
                // The token looked fresh locally but the server rejected it.
                // Renew once (single-flight, keyed to the rejected token)
                // and replay; a second rejection means the session is gone.
                if !replayed_after_renewal {
                    self.session
                        .renew_after_rejection(&credential.access_token)
                        .await?;
                    replayed_after_renewal = true;
                    continue;
                }
                self.session.invalidate();
                return Err(ApiError::SessionExpired);
            }

            if !self
                .policy
                .should_retry(&error, attempt, spec.is_idempotent())
            {
                return Err(error);
            }

            let delay = self.policy.delay(&error, attempt);
            warn!(
                method = spec.method.as_str(),
                path = %spec.path,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying request"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
