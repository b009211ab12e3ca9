use serde::{Deserialize, Serialize};

/// Identity claims carried by a credential, as returned by the login
/// endpoint. Opaque to this crate beyond display purposes; authorization
/// decisions belong to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(rename = "isEmailVerified", default)]
    pub email_verified: bool,
}

impl UserIdentity {
    /// Name for a session indicator, falling back to the email address.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.email)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
