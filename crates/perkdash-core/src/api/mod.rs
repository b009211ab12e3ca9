//! REST plumbing for the perkdash backend.
//!
//! `client` is the transport seam, `error` the failure taxonomy, and
//! `pipeline` the retrying, token-refreshing wrapper that every dashboard
//! call goes through.

pub mod client;
pub mod error;
pub mod pipeline;

pub use client::{ApiClient, Method, OutboundRequest, RawResponse, Transport, TransportError};
pub use error::{ApiError, ErrorCategory};
pub use pipeline::{RequestPipeline, RequestSpec, RetryPolicy};
