//! Wire types for the `app.bsky` and `com.atproto` lexicons.
//!
//! Collections of feed items and thread nodes are kept as raw JSON values so
//! each element can be decoded on its own and a malformed one skipped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::StrongRef;

/// Session information from authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub did: String,
    pub handle: String,
    pub access_jwt: String,
    pub refresh_jwt: String,
}

/// Response from `com.atproto.server.getSession`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub did: String,
    pub handle: String,
}

/// XRPC error body.
#[derive(Debug, Deserialize)]
pub(crate) struct XrpcError {
    pub error: String,
    #[serde(default)]
    pub message: String,
}

/// Response from creating a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRecordResponse {
    pub uri: String,
    pub cid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveHandleResponse {
    pub did: String,
}

/// A moderation or self label.
#[derive(Debug, Clone, Deserialize)]
pub struct Label {
    pub val: String,
}

/// Viewer-relative state on an actor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorViewer {
    /// URI of the viewer's follow record, when following.
    pub following: Option<String>,
    pub followed_by: Option<String>,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub blocked_by: bool,
}

/// `app.bsky.actor.defs#profileViewBasic`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileViewBasic {
    pub did: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub viewer: Option<ActorViewer>,
}

/// `app.bsky.actor.defs#profileViewDetailed`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileViewDetailed {
    pub did: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub banner: Option<String>,
    pub followers_count: Option<u64>,
    pub follows_count: Option<u64>,
    pub posts_count: Option<u64>,
    pub viewer: Option<ActorViewer>,
}

/// Viewer-relative state on a post.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostViewerState {
    /// URI of the viewer's like record.
    pub like: Option<String>,
    /// URI of the viewer's repost record.
    pub repost: Option<String>,
    #[serde(default)]
    pub bookmarked: bool,
}

/// `app.bsky.feed.defs#postView`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub uri: String,
    pub cid: String,
    pub author: ProfileViewBasic,
    pub record: Value,
    pub embed: Option<Value>,
    pub reply_count: Option<u64>,
    pub repost_count: Option<u64>,
    pub like_count: Option<u64>,
    pub indexed_at: DateTime<Utc>,
    pub viewer: Option<PostViewerState>,
    #[serde(default)]
    pub labels: Vec<Label>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByteSlice {
    pub byte_start: usize,
    pub byte_end: usize,
}

/// `app.bsky.richtext.facet`. Features stay raw so unknown kinds are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Facet {
    pub index: ByteSlice,
    #[serde(default)]
    pub features: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplyRef {
    pub root: StrongRef,
    pub parent: StrongRef,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelfLabels {
    #[serde(default)]
    pub values: Vec<Label>,
}

/// The `app.bsky.feed.post` record body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    #[serde(default)]
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub facets: Vec<Facet>,
    pub reply: Option<ReplyRef>,
    pub labels: Option<SelfLabels>,
}

/// `app.bsky.feed.defs#feedViewPost`.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedViewPost {
    pub post: PostView,
    pub reply: Option<ReplyContext>,
    pub reason: Option<Value>,
}

/// Parent and root of a reply; either may be a post, blocked or missing.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplyContext {
    pub parent: Value,
    pub root: Option<Value>,
}

/// `app.bsky.feed.defs#reasonRepost`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonRepost {
    pub by: ProfileViewBasic,
    pub indexed_at: DateTime<Utc>,
}

/// A page of feed items (`getTimeline`, `getAuthorFeed`).
#[derive(Debug, Clone, Deserialize)]
pub struct FeedResponse {
    #[serde(default)]
    pub feed: Vec<Value>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadResponse {
    pub thread: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostsResponse {
    #[serde(default)]
    pub posts: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FollowsResponse {
    #[serde(default)]
    pub follows: Vec<Value>,
    pub cursor: Option<String>,
}

/// Lexicon type names for union members Duet inspects.
pub mod lex {
    pub const THREAD_VIEW_POST: &str = "app.bsky.feed.defs#threadViewPost";
    pub const NOT_FOUND_POST: &str = "app.bsky.feed.defs#notFoundPost";
    pub const BLOCKED_POST: &str = "app.bsky.feed.defs#blockedPost";
    pub const REASON_REPOST: &str = "app.bsky.feed.defs#reasonRepost";

    pub const FACET_LINK: &str = "app.bsky.richtext.facet#link";
    pub const FACET_MENTION: &str = "app.bsky.richtext.facet#mention";
    pub const FACET_TAG: &str = "app.bsky.richtext.facet#tag";

    pub const EMBED_IMAGES: &str = "app.bsky.embed.images#view";
    pub const EMBED_VIDEO: &str = "app.bsky.embed.video#view";
    pub const EMBED_EXTERNAL: &str = "app.bsky.embed.external#view";
    pub const EMBED_RECORD: &str = "app.bsky.embed.record#view";
    pub const EMBED_RECORD_WITH_MEDIA: &str = "app.bsky.embed.recordWithMedia#view";
    pub const EMBED_VIEW_RECORD: &str = "app.bsky.embed.record#viewRecord";
}

/// The `$type` discriminator of a union member, if present.
pub fn type_of(value: &Value) -> Option<&str> {
    value.get("$type").and_then(Value::as_str)
}
