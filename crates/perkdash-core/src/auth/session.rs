//! Credential data and expiry arithmetic.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::UserIdentity;

/// Access token lifetime in minutes.
/// The backend issues 15-minute access tokens; expiry is always derived from
/// issue time plus this constant, never from inspecting the token itself.
pub(crate) const TOKEN_LIFETIME_MINUTES: i64 = 15;

/// The active credential set: short-lived access token, the refresh token
/// used to renew it, and the identity claims returned at sign-in.
///
/// Owned by [`TokenStore`](super::TokenStore); other components hold at most
/// a short-lived clone read for a single request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub identity: UserIdentity,
}

impl Credential {
    /// Build a credential stamped with the fixed lifetime from now.
    pub fn issued_now(access_token: String, refresh_token: String, identity: UserIdentity) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at: Utc::now() + Duration::minutes(TOKEN_LIFETIME_MINUTES),
            identity,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    /// Minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes().max(0)
    }
}
