//! Record collection constants and the records Duet writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bluesky follow records.
pub const FOLLOW_COLLECTION: &str = "app.bsky.graph.follow";

/// Bluesky like records.
pub const LIKE_COLLECTION: &str = "app.bsky.feed.like";

/// Bluesky repost records.
pub const REPOST_COLLECTION: &str = "app.bsky.feed.repost";

/// Bluesky post records.
pub const POST_COLLECTION: &str = "app.bsky.feed.post";

/// A strong reference to a record (URI + CID).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

/// Subject record for likes and reposts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRecord {
    pub subject: StrongRef,
    pub created_at: DateTime<Utc>,
}

impl SubjectRecord {
    pub fn new(uri: impl Into<String>, cid: impl Into<String>) -> Self {
        Self {
            subject: StrongRef {
                uri: uri.into(),
                cid: cid.into(),
            },
            created_at: Utc::now(),
        }
    }
}

/// Follow record; the subject is the followed account's DID.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowRecord {
    pub subject: String,
    pub created_at: DateTime<Utc>,
}

impl FollowRecord {
    pub fn new(did: impl Into<String>) -> Self {
        Self {
            subject: did.into(),
            created_at: Utc::now(),
        }
    }
}
