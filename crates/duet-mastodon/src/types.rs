//! Wire types for the Mastodon REST API.
//!
//! Lists of statuses are kept as raw JSON values so each element can be
//! decoded on its own and a malformed one skipped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An account as embedded in statuses and returned by account endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub id: String,
    pub username: String,
    /// `user` for local accounts, `user@domain` for remote ones.
    pub acct: String,
    #[serde(default)]
    pub display_name: String,
    pub avatar: Option<String>,
    pub header: Option<String>,
    /// Profile bio as HTML.
    #[serde(default)]
    pub note: String,
    pub followers_count: Option<u64>,
    pub following_count: Option<u64>,
    pub statuses_count: Option<u64>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaAttachment {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: Option<String>,
    pub preview_url: Option<String>,
    pub remote_url: Option<String>,
    pub description: Option<String>,
}

/// A quote attached to a status. The quoted status is absent when it was
/// deleted or is not visible to the viewer.
#[derive(Debug, Clone, Deserialize)]
pub struct Quote {
    pub state: Option<String>,
    pub quoted_status: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Status {
    pub id: String,
    pub uri: String,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub account: Account,
    /// Body as HTML.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub spoiler_text: String,
    #[serde(default)]
    pub sensitive: bool,
    pub in_reply_to_id: Option<String>,
    pub in_reply_to_account_id: Option<String>,
    pub reblog: Option<Box<Status>>,
    #[serde(default)]
    pub media_attachments: Vec<MediaAttachment>,
    pub replies_count: Option<u64>,
    pub reblogs_count: Option<u64>,
    pub favourites_count: Option<u64>,
    pub favourited: Option<bool>,
    pub reblogged: Option<bool>,
    pub bookmarked: Option<bool>,
    pub quote: Option<Quote>,
}

/// Response from `GET /api/v1/statuses/:id/context`.
#[derive(Debug, Clone, Deserialize)]
pub struct Context {
    #[serde(default)]
    pub ancestors: Vec<Value>,
    #[serde(default)]
    pub descendants: Vec<Value>,
}

/// The viewer's relationship with an account.
#[derive(Debug, Clone, Deserialize)]
pub struct Relationship {
    pub id: String,
    #[serde(default)]
    pub following: bool,
    #[serde(default)]
    pub followed_by: bool,
}

/// Response from `GET /api/v2/search`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub accounts: Vec<Value>,
    #[serde(default)]
    pub statuses: Vec<Value>,
}

/// Response from `POST /oauth/token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

