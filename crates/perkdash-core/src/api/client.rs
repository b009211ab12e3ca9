//! HTTP transport for the perkdash API.
//!
//! [`Transport`] is the seam between the request pipeline and the network:
//! the pipeline and the session lifecycle only ever see [`OutboundRequest`]
//! in and [`RawResponse`] (or [`TransportError`]) out, so tests drive them
//! with scripted transports instead of a live server. [`ApiClient`] is the
//! reqwest-backed implementation used in production.

use std::time::Duration;

use anyhow::Result;
use futures::future::BoxFuture;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
/// This bounds a single attempt; the pipeline's deadline bounds the whole
/// retry sequence.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// HTTP verbs the pipeline issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Only safe verbs count as idempotent for retry purposes. A PUT or
    /// DELETE that reached the server may already have been applied, so
    /// every mutating verb is single-shot once a response exists.
    pub fn is_idempotent(&self) -> bool {
        matches!(self, Method::Get)
    }
}

/// A fully-resolved outbound call: absolute URL, bearer already chosen.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

/// Status and raw body of a received response, before classification.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// A failure with no response at all - nothing is known to have reached the
/// server.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub timed_out: bool,
}

/// Object-safe transport seam. Implementations must not retry internally;
/// retry policy belongs to the pipeline.
pub trait Transport: Send + Sync {
    fn send(&self, request: OutboundRequest) -> BoxFuture<'static, Result<RawResponse, TransportError>>;
}

/// API client for the perkdash REST backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
}

impl ApiClient {
    /// Create a new API client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for ApiClient {
    fn send(&self, request: OutboundRequest) -> BoxFuture<'static, Result<RawResponse, TransportError>> {
        let client = self.client.clone();
        Box::pin(async move {
            let mut builder = match request.method {
                Method::Get => client.get(&request.url),
                Method::Post => client.post(&request.url),
                Method::Put => client.put(&request.url),
                Method::Patch => client.patch(&request.url),
                Method::Delete => client.delete(&request.url),
            };
            if let Some(ref token) = request.bearer {
                builder = builder.bearer_auth(token);
            }
            if let Some(ref body) = request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await.map_err(|e| TransportError {
                timed_out: e.is_timeout(),
                message: e.to_string(),
            })?;

            let status = response.status().as_u16();
            let body = response
                .bytes()
                .await
                .map_err(|e| TransportError {
                    timed_out: e.is_timeout(),
                    message: e.to_string(),
                })?
                .to_vec();

            debug!(method = request.method.as_str(), url = %request.url, status, "Response received");
            Ok(RawResponse { status, body })
        })
    }
}
