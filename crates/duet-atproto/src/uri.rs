//! AT URI and web permalink parsing.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::POST_COLLECTION;

static PERMALINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.)?bsky\.app/profile/([^/\s?#]+)/post/([A-Za-z0-9._:~-]+)/?$")
        .unwrap()
});

/// Error when parsing an AT URI.
#[derive(Debug, Error)]
#[error("invalid AT URI: {0}")]
pub struct AtUriError(String);

/// A parsed AT Protocol URI.
///
/// AT URIs have the format: `at://{authority}/{collection}/{rkey}`. The
/// authority is a DID for every URI the network hands out.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AtUri {
    pub did: String,
    /// The collection (e.g., "app.bsky.feed.post").
    pub collection: String,
    pub rkey: String,
}

impl AtUri {
    /// Parse an AT URI string.
    ///
    /// ```
    /// use duet_atproto::AtUri;
    ///
    /// let uri = AtUri::parse("at://did:plc:abc123/app.bsky.feed.post/3abc").unwrap();
    /// assert_eq!(uri.did, "did:plc:abc123");
    /// assert_eq!(uri.collection, "app.bsky.feed.post");
    /// assert_eq!(uri.rkey, "3abc");
    /// ```
    pub fn parse(uri: &str) -> Result<Self, AtUriError> {
        let rest = uri
            .strip_prefix("at://")
            .ok_or_else(|| AtUriError(format!("missing at:// prefix: {uri}")))?;

        let parts: Vec<&str> = rest.splitn(3, '/').collect();
        if parts.len() != 3 {
            return Err(AtUriError(format!("expected did/collection/rkey: {uri}")));
        }

        if parts.iter().any(|p| p.is_empty()) {
            return Err(AtUriError(format!("empty component in URI: {uri}")));
        }

        Ok(Self {
            did: parts[0].to_string(),
            collection: parts[1].to_string(),
            rkey: parts[2].to_string(),
        })
    }

    /// A post URI in `did`'s repository.
    pub fn post(did: impl Into<String>, rkey: impl Into<String>) -> Self {
        Self {
            did: did.into(),
            collection: POST_COLLECTION.to_string(),
            rkey: rkey.into(),
        }
    }

    /// The record key: the path segment after the final `/`.
    ///
    /// Works on any URI-like string without full parsing and returns an
    /// empty string for a trailing slash.
    ///
    /// ```
    /// use duet_atproto::AtUri;
    ///
    /// assert_eq!(AtUri::extract_rkey("at://did:plc:me/app.bsky.feed.like/3kx"), "3kx");
    /// assert_eq!(AtUri::extract_rkey("no-slash"), "no-slash");
    /// ```
    pub fn extract_rkey(uri: &str) -> &str {
        uri.rsplit('/').next().unwrap_or("")
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}/{}/{}", self.did, self.collection, self.rkey)
    }
}

/// A `bsky.app` post link found in post text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permalink {
    /// Handle or DID as written in the link.
    pub actor: String,
    pub rkey: String,
}

impl Permalink {
    pub fn parse(url: &str) -> Option<Self> {
        let caps = PERMALINK_RE.captures(url.trim())?;
        Some(Self {
            actor: caps[1].to_string(),
            rkey: caps[2].to_string(),
        })
    }

    /// True if the actor segment is already a DID and needs no resolution.
    pub fn has_did(&self) -> bool {
        self.actor.starts_with("did:")
    }
}
