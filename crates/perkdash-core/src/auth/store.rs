//! Current-credential store and its durable mirrors.
//!
//! [`TokenStore`] is the single source of truth for the active
//! [`Credential`]. Reads never block on I/O and never fail. Every write and
//! clear is mirrored to a [`CredentialStorage`] backend so a restart resumes
//! the same session, and published on a watch channel for observers (the
//! expiration watcher, a session indicator in the UI).

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::warn;

use super::session::Credential;

/// Session file name in the cache directory
const SESSION_FILE: &str = "session.json";

/// Durable mirror of the credential record.
///
/// `load` is consulted once when the store is built; `save`/`clear` run on
/// every session change. Implementations hold exactly one namespaced record.
pub trait CredentialStorage: Send + Sync {
    fn load(&self) -> Result<Option<Credential>>;
    fn save(&self, credential: &Credential) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// `session.json` under an app-scoped cache directory.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            path: cache_dir.join(SESSION_FILE),
        }
    }
}

impl CredentialStorage for FileStorage {
    fn load(&self) -> Result<Option<Credential>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents =
            std::fs::read_to_string(&self.path).context("Failed to read session file")?;
        match serde_json::from_str(&contents) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                // A record we can no longer parse is treated as absent.
                warn!(error = %e, "Discarding unreadable session file");
                Ok(None)
            }
        }
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(credential)?;
        std::fs::write(&self.path, contents).context("Failed to write session file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}

/// Non-durable storage for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStorage {
    slot: Mutex<Option<Credential>>,
}

impl CredentialStorage for MemoryStorage {
    fn load(&self) -> Result<Option<Credential>> {
        Ok(self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// The single source of truth for the active credential.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    current: Mutex<Option<Credential>>,
    storage: Box<dyn CredentialStorage>,
    expiry_tx: watch::Sender<Option<DateTime<Utc>>>,
}

impl TokenStore {
    /// Create a store over the given durable backend, resuming any persisted
    /// credential that has not already expired at rest.
    pub fn new(storage: Box<dyn CredentialStorage>) -> Self {
        let resumed = match storage.load() {
            Ok(Some(credential)) if !credential.is_expired() => Some(credential),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Failed to load persisted session");
                None
            }
        };
        let (expiry_tx, _) = watch::channel(resumed.as_ref().map(|c| c.expires_at));
        Self {
            inner: Arc::new(StoreInner {
                current: Mutex::new(resumed),
                storage,
                expiry_tx,
            }),
        }
    }

    /// Store with no durable mirror.
    pub fn in_memory() -> Self {
        Self::new(Box::<MemoryStorage>::default())
    }

    /// Current credential, if any. Never blocks, never fails.
    pub fn read(&self) -> Option<Credential> {
        self.inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Atomically replace the credential and mirror it to durable storage.
    /// A storage failure leaves the in-memory session authoritative.
    pub fn write(&self, credential: Credential) {
        if let Err(e) = self.inner.storage.save(&credential) {
            warn!(error = %e, "Failed to persist session");
        }
        let expires_at = credential.expires_at;
        *self
            .inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(credential);
        self.inner.expiry_tx.send_replace(Some(expires_at));
    }

    /// Atomically wipe the credential and its durable record.
    pub fn clear(&self) {
        if let Err(e) = self.inner.storage.clear() {
            warn!(error = %e, "Failed to clear persisted session");
        }
        *self
            .inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.inner.expiry_tx.send_replace(None);
    }

    /// Watch the expiry of the current credential (`None` while signed out).
    pub fn subscribe(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.inner.expiry_tx.subscribe()
    }
}
