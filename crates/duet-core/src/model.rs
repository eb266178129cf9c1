//! Canonical types produced by the adapters and consumed by the aggregator.

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::richtext::StyledText;

/// The social networks Duet can aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// A Mastodon-compatible instance API.
    Mastodon,
    /// The AT Protocol network.
    Bluesky,
}

impl Network {
    /// All supported networks, in merge order.
    pub const ALL: [Network; 2] = [Network::Mastodon, Network::Bluesky];

    /// Prefix used in global ids.
    pub fn prefix(self) -> &'static str {
        match self {
            Network::Mastodon => "mastodon",
            Network::Bluesky => "bluesky",
        }
    }

    /// Parse a network from its prefix.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mastodon" => Some(Network::Mastodon),
            "bluesky" | "bsky" => Some(Network::Bluesky),
            _ => None,
        }
    }

    /// Build a global id (`<network>:<native-id>`).
    pub fn global_id(self, native_id: &str) -> String {
        format!("{}:{}", self.prefix(), native_id)
    }

    /// Split a global id into its network and native id.
    ///
    /// ```
    /// use duet_core::Network;
    ///
    /// let (network, native) = Network::split_global_id("bluesky:at://did:plc:a/app.bsky.feed.post/3k").unwrap();
    /// assert_eq!(network, Network::Bluesky);
    /// assert_eq!(native, "at://did:plc:a/app.bsky.feed.post/3k");
    /// ```
    pub fn split_global_id(id: &str) -> Option<(Self, &str)> {
        let (prefix, native) = id.split_once(':')?;
        if native.is_empty() {
            return None;
        }
        Some((Self::parse(prefix)?, native))
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Opaque pagination token issued by one adapter.
///
/// The aggregator never inspects it; it is handed back verbatim to the
/// adapter that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One fetched page of posts.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub posts: Vec<Post>,
    /// `None` means the feed is exhausted.
    pub next_cursor: Option<Cursor>,
}

/// Compact author identity attached to posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Native account identifier (DID or account id).
    pub id: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

impl Author {
    /// Display name, falling back to the handle when empty.
    pub fn name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.handle)
    }
}

/// Kind of attached media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Image,
    Video,
    Gif,
}

impl MediaKind {
    /// Classify a native content-type string.
    ///
    /// Accepts both MIME types (`video/mp4`) and bare network kinds
    /// (`gifv`). Anything unrecognized is an image.
    pub fn from_content_type(content_type: &str) -> Self {
        let lower = content_type.to_ascii_lowercase();
        if lower == "gifv" || lower == "gif" || lower == "image/gif" {
            MediaKind::Gif
        } else if lower == "video" || lower.starts_with("video/") {
            MediaKind::Video
        } else {
            MediaKind::Image
        }
    }
}

/// A media attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub url: String,
    pub preview_url: Option<String>,
    pub alt: Option<String>,
    pub kind: MediaKind,
}

/// Engagement counters. `None` means the network did not report the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Engagement {
    pub replies: Option<u64>,
    pub reposts: Option<u64>,
    pub likes: Option<u64>,
}

/// Network-specific tokens needed to reverse an earlier action.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UndoTokens {
    pub like: Option<String>,
    pub repost: Option<String>,
}

/// Viewer-relative interaction flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ViewerState {
    pub liked: bool,
    pub reposted: bool,
    pub bookmarked: bool,
}

/// A quoted post. Quotes never nest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotedPost {
    pub id: String,
    pub network: Network,
    pub native_id: String,
    pub author: Author,
    pub created_at: DateTime<Utc>,
    pub text: StyledText,
    pub media: Vec<Media>,
    pub labels: Vec<String>,
}

impl From<&Post> for QuotedPost {
    fn from(post: &Post) -> Self {
        Self {
            id: post.id.clone(),
            network: post.network,
            native_id: post.native_id.clone(),
            author: post.author.clone(),
            created_at: post.created_at,
            text: post.text.clone(),
            media: post.media.clone(),
            labels: post.labels.clone(),
        }
    }
}

/// The canonical post.
///
/// Equality and hashing use [`Post::id`] only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    /// Global id, `<network>:<native-id>`.
    pub id: String,
    pub network: Network,
    /// Host that served the post (instance or PDS).
    pub instance: String,
    /// Native identifier (status id or AT URI).
    pub native_id: String,
    /// Content hash, for networks that reference records by hash.
    pub native_cid: Option<String>,
    pub author: Author,
    /// When the item entered the feed. For boosts this is the boost time.
    pub created_at: DateTime<Utc>,
    pub text: StyledText,
    pub media: Vec<Media>,
    pub quote: Option<QuotedPost>,
    pub content_warning: Option<String>,
    pub labels: Vec<String>,
    pub counts: Engagement,
    /// Global id of the post this replies to.
    pub reply_parent_id: Option<String>,
    /// Set when this item is a boost/repost; identifies the booster.
    pub reposted_by: Option<Author>,
    pub undo: UndoTokens,
    pub viewer: ViewerState,
}

impl Post {
    pub fn is_repost(&self) -> bool {
        self.reposted_by.is_some()
    }

    pub fn is_reply(&self) -> bool {
        self.reply_parent_id.is_some()
    }
}

impl PartialEq for Post {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Post {}

impl Hash for Post {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// A reply in a flattened thread. `depth` is at least 1.
#[derive(Debug, Clone)]
pub struct ThreadItem {
    pub id: String,
    pub post: Post,
    pub depth: u32,
}

/// Profile data unified across networks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedUser {
    /// Global id, `<network>:<native-id>`.
    pub id: String,
    pub network: Network,
    pub native_id: String,
    /// Fully qualified handle (`user@instance` or a domain handle).
    pub handle: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub banner: Option<String>,
    pub bio: StyledText,
    pub followers_count: Option<u64>,
    pub following_count: Option<u64>,
    pub posts_count: Option<u64>,
    /// `None` when the relationship could not be resolved.
    pub is_following: Option<bool>,
    pub is_followed_by: Option<bool>,
    /// Token needed to undo the viewer's follow.
    pub follow_token: Option<String>,
}
