//! Session expiry watcher.
//!
//! A low-frequency background task that warns observers before the access
//! token lapses, independent of request traffic. Purely observational - it
//! never mutates the store and never blocks a request.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::debug;

use super::lifecycle::SessionEvent;
use super::store::TokenStore;

/// Seconds between expiry checks. Well under the 15-minute token lifetime.
const CHECK_INTERVAL_SECS: u64 = 30;

/// Warn once the remaining lifetime drops under this many seconds.
const WARN_THRESHOLD_SECS: i64 = 60;

/// Watches the token store and emits one [`SessionEvent::ExpiringSoon`] per
/// approaching expiry. Dropping the watcher stops the background task.
pub struct ExpirationWatcher {
    handle: JoinHandle<()>,
}

impl ExpirationWatcher {
    /// Spawn the watcher over `store`, reporting on `events`.
    pub fn spawn(store: TokenStore, events: broadcast::Sender<SessionEvent>) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(CHECK_INTERVAL_SECS));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Expiry already warned about; a rotated credential re-arms the
            // warning because its expiry differs.
            let mut warned_for: Option<DateTime<Utc>> = None;

            loop {
                ticker.tick().await;

                let Some(credential) = store.read() else {
                    warned_for = None;
                    continue;
                };

                let remaining = credential.time_until_expiry().num_seconds();
                if remaining <= 0 {
                    // Already lapsed; renewal is the pipeline's job.
                    continue;
                }
                if remaining > WARN_THRESHOLD_SECS || warned_for == Some(credential.expires_at) {
                    continue;
                }

                debug!(remaining_secs = remaining, "Session expiring soon");
                let _ = events.send(SessionEvent::ExpiringSoon {
                    remaining_secs: remaining,
                });
                warned_for = Some(credential.expires_at);
            }
        });
        Self { handle }
    }
}

impl Drop for ExpirationWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
