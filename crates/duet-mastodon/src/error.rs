//! Error types for the Mastodon client.

use duet_core::FeedError;
use thiserror::Error;

/// Errors that can occur when talking to a Mastodon-compatible instance.
#[derive(Debug, Error)]
pub enum MastodonError {
    /// Missing or rejected credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Rate limited.
    #[error("rate limited{}", reset.as_ref().map(|r| format!(" (resets at {r})")).unwrap_or_default())]
    RateLimited { reset: Option<String> },

    /// Non-success status.
    #[error("request failed ({status}): {body}")]
    Status { status: u16, body: String },

    /// The instance answered with something Duet cannot use.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<MastodonError> for FeedError {
    fn from(err: MastodonError) -> Self {
        match err {
            MastodonError::Auth(_) => FeedError::AuthExpired { status: 401 },
            MastodonError::Http(e) if e.is_decode() => FeedError::Decoding(e.to_string()),
            MastodonError::Http(e) => FeedError::Network(e.to_string()),
            MastodonError::Json(e) => FeedError::Decoding(e.to_string()),
            MastodonError::RateLimited { .. } => FeedError::BadStatus {
                status: 429,
                body: String::new(),
                message: Some("rate limited".to_string()),
            },
            MastodonError::Status { status, body } => FeedError::from_status(status, body),
            MastodonError::InvalidResponse(m) => FeedError::Decoding(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_status_is_auth_expired() {
        let err = MastodonError::Status {
            status: 401,
            body: r#"{"error":"The access token is invalid"}"#.to_string(),
        };
        assert_eq!(FeedError::from(err), FeedError::AuthExpired { status: 401 });
    }

    #[test]
    fn test_error_body_message() {
        let err = MastodonError::Status {
            status: 404,
            body: r#"{"error":"Record not found"}"#.to_string(),
        };
        assert_eq!(FeedError::from(err).user_message(), "Record not found");
    }
}
