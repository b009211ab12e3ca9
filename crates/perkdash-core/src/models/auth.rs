use serde::Deserialize;

use super::UserIdentity;

/// Successful body of `POST /auth/login`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
    pub user: UserIdentity,
}

/// Successful body of `POST /auth/refresh-token`. The refresh token is only
/// present when the server rotates it; absence means keep using the old one.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken", default)]
    pub refresh_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_login_response() {
        let json = r#"{"accessToken":"at-1","refreshToken":"rt-1","user":{"id":"u-1","email":"admin@example.com","roles":["admin"],"isEmailVerified":true}}"#;
        let parsed: LoginResponse = serde_json::from_str(json).expect("Failed to parse login response");
        assert_eq!(parsed.access_token, "at-1");
        assert_eq!(parsed.refresh_token, "rt-1");
        assert_eq!(parsed.user.email, "admin@example.com");
    }

    #[test]
    fn test_refresh_response_without_rotation() {
        let json = r#"{"accessToken":"at-2"}"#;
        let parsed: RefreshResponse = serde_json::from_str(json).expect("Failed to parse refresh response");
        assert_eq!(parsed.access_token, "at-2");
        assert!(parsed.refresh_token.is_none());
    }
}
