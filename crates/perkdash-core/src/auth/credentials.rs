//! Keychain-backed session storage.
//!
//! Stores the serialized credential record in the OS keychain instead of a
//! cache file, for hosts that want refresh tokens off disk. Same contract
//! as the other [`CredentialStorage`] backends: one namespaced record.

use anyhow::{Context, Result};
use keyring::Entry;
use tracing::warn;

use super::session::Credential;
use super::store::CredentialStorage;

const SERVICE_NAME: &str = "perkdash";

/// Account name for the single session record
const SESSION_ACCOUNT: &str = "session";

pub struct KeyringStorage;

impl KeyringStorage {
    fn entry() -> Result<Entry> {
        Entry::new(SERVICE_NAME, SESSION_ACCOUNT).context("Failed to create keyring entry")
    }
}

impl CredentialStorage for KeyringStorage {
    fn load(&self) -> Result<Option<Credential>> {
        let entry = Self::entry()?;
        match entry.get_password() {
            Ok(serialized) => match serde_json::from_str(&serialized) {
                Ok(credential) => Ok(Some(credential)),
                Err(e) => {
                    // A record we can no longer parse is treated as absent.
                    warn!(error = %e, "Discarding unreadable keychain session record");
                    Ok(None)
                }
            },
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to read session record from keychain"),
        }
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        let serialized = serde_json::to_string(credential)?;
        Self::entry()?
            .set_password(&serialized)
            .context("Failed to store session record in keychain")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match Self::entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete session record from keychain"),
        }
    }
}
