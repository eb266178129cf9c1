//! Error taxonomy shared by every adapter.

use serde::Deserialize;
use thiserror::Error;

/// Errors surfaced by adapter calls.
///
/// Adapters never retry internally. [`FeedError::AuthExpired`] is the signal
/// for the caller to refresh credentials and retry exactly once.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    /// Transport or connectivity failure.
    #[error("network error: {0}")]
    Network(String),

    /// The server rejected the request with a non-2xx status.
    #[error("server returned {status}{}", message.as_ref().map(|m| format!(": {m}")).unwrap_or_default())]
    BadStatus {
        status: u16,
        body: String,
        /// Best-effort human readable message parsed from the body.
        message: Option<String>,
    },

    /// The response did not have the expected shape.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// Credentials were rejected (401/403 or an expired-token error).
    #[error("authentication expired (status {status})")]
    AuthExpired { status: u16 },

    #[error("unknown error: {0}")]
    Unknown(String),
}

/// Common JSON error body fields across the supported networks.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

impl FeedError {
    /// Build an error from a non-success status and its body.
    ///
    /// 401 and 403 become [`FeedError::AuthExpired`]; everything else is
    /// [`FeedError::BadStatus`] with a message extracted from a JSON body when
    /// one is present.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        if status == 401 || status == 403 {
            return Self::AuthExpired { status };
        }
        let body = body.into();
        let message = parse_error_message(&body);
        Self::BadStatus {
            status,
            body,
            message,
        }
    }

    /// Returns true if the caller should refresh credentials and retry.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired { .. })
    }

    /// Short text suitable for a non-fatal banner.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) => "Could not reach the server".to_string(),
            Self::BadStatus {
                message: Some(m), ..
            } => m.clone(),
            Self::BadStatus { status, .. } => format!("The server returned an error ({status})"),
            Self::Decoding(_) => "The server sent an unexpected response".to_string(),
            Self::AuthExpired { .. } => "Your session has expired".to_string(),
            Self::Unknown(m) => m.clone(),
        }
    }
}

fn parse_error_message(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    parsed
        .message
        .or(parsed.error_description)
        .or(parsed.error)
        .filter(|m| !m.is_empty())
}
