//! Session and credential management.
//!
//! This module provides:
//! - `TokenStore`: the single source of truth for the active credential
//! - `SessionLifecycle`: sign-in, single-flight renewal, teardown
//! - `ExpirationWatcher`: early warning before the access token lapses
//! - storage backends: `FileStorage`, `KeyringStorage`, `MemoryStorage`
//!
//! Sessions persist across restarts; access tokens live for 15 minutes.

pub mod credentials;
pub mod lifecycle;
pub mod session;
pub mod store;
pub mod watcher;

pub use credentials::KeyringStorage;
pub use lifecycle::{SessionEvent, SessionLifecycle, SessionState};
pub use session::Credential;
pub use store::{CredentialStorage, FileStorage, MemoryStorage, TokenStore};
pub use watcher::ExpirationWatcher;
