use serde::Deserialize;
use thiserror::Error;

use super::client::TransportError;

/// Maximum length for error response bodies folded into error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Failure taxonomy attached to every surfaced error.
///
/// The category drives both the retry policy and user-facing messaging, so
/// it is a closed set: a status the classifier does not recognize lands in
/// `Unknown` rather than growing the enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Auth,
    Validation,
    NotFound,
    Conflict,
    RateLimit,
    Server,
    Unknown,
}

#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// No response was received; nothing is known to have reached the server.
    #[error("Network error: {0}")]
    Network(String),

    /// The caller-supplied deadline elapsed before the request settled.
    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    /// 401 - the server rejected the credential outright.
    #[error("{0}")]
    Unauthorized(String),

    /// 403 - the session is valid but lacks permission. Never terminates
    /// the session.
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    RateLimited(String),

    #[error("{message}")]
    Server { status: u16, message: String },

    #[error("{message}")]
    Unknown { status: u16, message: String },

    /// A successful status whose body could not be decoded.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The session is dead; a fresh sign-in is required.
    #[error("Session expired - please sign in again")]
    SessionExpired,
}

impl ApiError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ApiError::Network(_) | ApiError::DeadlineExceeded => ErrorCategory::Network,
            ApiError::Unauthorized(_) | ApiError::Forbidden(_) | ApiError::SessionExpired => {
                ErrorCategory::Auth
            }
            ApiError::Validation(_) => ErrorCategory::Validation,
            ApiError::NotFound(_) => ErrorCategory::NotFound,
            ApiError::Conflict(_) => ErrorCategory::Conflict,
            ApiError::RateLimited(_) => ErrorCategory::RateLimit,
            ApiError::Server { .. } => ErrorCategory::Server,
            ApiError::Unknown { .. } | ApiError::InvalidResponse(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether the pipeline may retry this failure at all. `Server` is only
    /// ever constructed for 5xx/408 statuses, so no further status check is
    /// needed here.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Network(_) | ApiError::RateLimited(_) | ApiError::Server { .. }
        )
    }

    /// Whether any response was received. A mutation that produced a
    /// response may have been applied server-side; one that produced none
    /// cannot have been.
    pub fn received_response(&self) -> bool {
        !matches!(self, ApiError::Network(_) | ApiError::DeadlineExceeded)
    }

    /// Classify a received response into an error. A server-supplied message
    /// (first element if an array) takes precedence over the per-category
    /// default.
    pub fn from_status(status: u16, body: &str) -> Self {
        let server_message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|parsed| parsed.primary_message().map(str::to_string));
        let message = |fallback: &str| server_message.clone().unwrap_or_else(|| fallback.to_string());

        match status {
            401 => ApiError::Unauthorized(message("Your session is no longer valid")),
            403 => {
                ApiError::Forbidden(message("You do not have permission to perform this action"))
            }
            400 | 422 => ApiError::Validation(message("The submitted data was rejected")),
            404 => ApiError::NotFound(message("The requested resource was not found")),
            409 => ApiError::Conflict(message("The request conflicts with the current state")),
            429 => ApiError::RateLimited(message("Too many requests - please wait before retrying")),
            408 | 500 | 502 | 503 | 504 => ApiError::Server {
                status,
                message: message("The server encountered an error"),
            },
            _ => ApiError::Unknown {
                status,
                message: server_message
                    .clone()
                    .unwrap_or_else(|| format!("Status {}: {}", status, truncate_body(body))),
            },
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        ApiError::Network(err.message)
    }
}

/// Standard error body: `{statusCode, message: string | string[], error?}`.
/// The status is taken from the response line, not the body, so only the
/// message fields are read here.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<ErrorMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorMessage {
    One(String),
    Many(Vec<String>),
}

impl ErrorBody {
    fn primary_message(&self) -> Option<&str> {
        let from_message = match &self.message {
            Some(ErrorMessage::One(msg)) => Some(msg.as_str()),
            Some(ErrorMessage::Many(msgs)) => msgs.first().map(String::as_str),
            None => None,
        };
        from_message
            .filter(|msg| !msg.is_empty())
            .or(self.error.as_deref())
    }
}

/// Truncate a response body to avoid folding excessive data into messages
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut cut = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}... (truncated, {} total bytes)",
        &body[..cut],
        body.len()
    )
}
