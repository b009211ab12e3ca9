//! perkdash-core - the authenticated request pipeline behind the perkdash
//! admin dashboard.
//!
//! The dashboard's forms and tables live elsewhere; this crate owns the
//! part with teeth: keeping a short-lived access token fresh across any
//! number of concurrent requests, classifying failures, retrying the ones
//! that are safe to retry, and tearing the session down exactly once when
//! credentials become unrecoverable.
//!
//! The pieces compose like this:
//!
//! - [`auth::TokenStore`] holds the current [`auth::Credential`], mirrored
//!   to durable storage so a restart resumes the session.
//! - [`auth::SessionLifecycle`] signs in, renews (single-flight) and signs
//!   out, emitting [`auth::SessionEvent`]s for the UI.
//! - [`api::RequestPipeline`] wraps every outbound call: fresh token,
//!   classified failures, bounded retries.
//! - [`auth::ExpirationWatcher`] warns before the token lapses.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ApiError, ErrorCategory, RequestPipeline, RequestSpec};
pub use auth::{
    Credential, ExpirationWatcher, SessionEvent, SessionLifecycle, SessionState, TokenStore,
};
pub use config::Config;
