//! Error types for the AT Protocol client.

use duet_core::FeedError;
use thiserror::Error;

use crate::AtUriError;

/// Errors that can occur when talking to a PDS or AppView.
#[derive(Debug, Error)]
pub enum AtprotoError {
    /// Authentication failed or no session is available.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid response from server.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limited.
    #[error("rate limited{}", retry_after_secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    /// XRPC error from server.
    #[error("XRPC error ({status}): {error} - {message}")]
    Xrpc {
        status: u16,
        error: String,
        message: String,
    },

    /// Non-success status without an XRPC error body.
    #[error("request failed ({status}): {body}")]
    Status { status: u16, body: String },

    /// An identifier that is not a usable AT URI.
    #[error(transparent)]
    Uri(#[from] AtUriError),
}

impl AtprotoError {
    /// Check if an error indicates an expired or rejected access token.
    pub fn is_expired_token(&self) -> bool {
        match self {
            AtprotoError::Xrpc { status, error, .. } => {
                error == "ExpiredToken" || error == "InvalidToken" || *status == 401
            }
            AtprotoError::Status { status, .. } => *status == 401,
            _ => false,
        }
    }
}

impl From<AtprotoError> for FeedError {
    fn from(err: AtprotoError) -> Self {
        if err.is_expired_token() {
            let status = match &err {
                AtprotoError::Xrpc { status, .. } | AtprotoError::Status { status, .. } => *status,
                _ => 401,
            };
            return FeedError::AuthExpired { status };
        }
        match err {
            AtprotoError::Auth(_) => FeedError::AuthExpired { status: 401 },
            AtprotoError::Http(e) if e.is_decode() => FeedError::Decoding(e.to_string()),
            AtprotoError::Http(e) => FeedError::Network(e.to_string()),
            AtprotoError::Json(e) => FeedError::Decoding(e.to_string()),
            AtprotoError::InvalidResponse(m) => FeedError::Decoding(m),
            AtprotoError::RateLimited { .. } => FeedError::BadStatus {
                status: 429,
                body: String::new(),
                message: Some("rate limited".to_string()),
            },
            AtprotoError::Xrpc {
                status,
                error,
                message,
            } => {
                if status == 403 {
                    return FeedError::AuthExpired { status };
                }
                FeedError::BadStatus {
                    status,
                    body: serde_json::json!({ "error": error, "message": message }).to_string(),
                    message: Some(if message.is_empty() { error } else { message }),
                }
            }
            AtprotoError::Status { status, body } => FeedError::from_status(status, body),
            AtprotoError::Uri(e) => FeedError::Unknown(e.to_string()),
        }
    }
}
