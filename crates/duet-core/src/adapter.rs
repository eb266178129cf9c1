//! The capability surface every network adapter implements.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Cursor, FeedError, Network, Page, Post, ThreadItem, UnifiedUser};

/// A viewer-initiated interaction on a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Like,
    Unlike,
    Repost,
    Unrepost,
    Bookmark,
    Unbookmark,
}

impl Action {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "like" => Some(Action::Like),
            "unlike" => Some(Action::Unlike),
            "repost" | "boost" => Some(Action::Repost),
            "unrepost" | "unboost" => Some(Action::Unrepost),
            "bookmark" => Some(Action::Bookmark),
            "unbookmark" => Some(Action::Unbookmark),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Like => "like",
            Action::Unlike => "unlike",
            Action::Repost => "repost",
            Action::Unrepost => "unrepost",
            Action::Bookmark => "bookmark",
            Action::Unbookmark => "unbookmark",
        };
        f.write_str(name)
    }
}

/// Connection details handed to an adapter by the credential store.
#[derive(Clone, Default)]
pub struct Credentials {
    /// Instance or PDS base URL.
    pub base_url: String,
    pub access_token: String,
    /// Native id of the signed-in account, when already known.
    pub actor_id: Option<String>,
    pub refresh_token: Option<String>,
}

impl Credentials {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            actor_id: None,
            refresh_token: None,
        }
    }

    pub fn with_actor_id(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Host part of the base URL, used as the post instance qualifier.
    pub fn host(&self) -> &str {
        let rest = self
            .base_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.base_url);
        rest.split('/').next().unwrap_or(rest)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &self.base_url)
            .field("actor_id", &self.actor_id)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// One social network behind a common interface.
///
/// Every call is a single request sequence with no internal retry. A
/// [`FeedError::AuthExpired`] result asks the caller to run
/// [`SocialAdapter::refresh_credentials`] and retry once.
///
/// Interaction methods accept posts from any network and return `Ok(None)`
/// without touching the wire when the post belongs to another network.
#[async_trait]
pub trait SocialAdapter: Send + Sync {
    fn network(&self) -> Network;

    /// Native id of the signed-in account, once known.
    async fn viewer_id(&self) -> Option<String>;

    /// One page of the home feed with the reply filter applied.
    async fn fetch_home_timeline(&self, cursor: Option<&Cursor>) -> Result<Page, FeedError>;

    /// Descendants of `root`, depth-tagged and flattened.
    async fn fetch_thread(&self, root: &Post) -> Result<Vec<ThreadItem>, FeedError>;

    /// Ancestors of `post`, oldest first with the immediate parent last.
    async fn fetch_ancestors(&self, post: &Post) -> Result<Vec<Post>, FeedError>;

    /// Resolve a single post by native id.
    async fn fetch_post(&self, native_id: &str) -> Result<Post, FeedError>;

    /// Resolve a handle, which may name a foreign domain, to a profile.
    async fn fetch_user_profile(&self, handle: &str) -> Result<UnifiedUser, FeedError>;

    async fn fetch_author_feed(
        &self,
        handle: &str,
        cursor: Option<&Cursor>,
    ) -> Result<Page, FeedError>;

    /// Returns the undo token for the new like, when the network issues one.
    async fn like(&self, post: &Post) -> Result<Option<String>, FeedError>;

    async fn unlike(&self, post: &Post, undo: Option<&str>) -> Result<Option<String>, FeedError>;

    /// Returns the undo token for the new repost, when the network issues one.
    async fn repost(&self, post: &Post) -> Result<Option<String>, FeedError>;

    async fn unrepost(&self, post: &Post, undo: Option<&str>)
    -> Result<Option<String>, FeedError>;

    async fn bookmark(&self, _post: &Post) -> Result<Option<String>, FeedError> {
        Ok(None)
    }

    async fn unbookmark(&self, _post: &Post) -> Result<Option<String>, FeedError> {
        Ok(None)
    }

    /// Returns the token needed to undo the follow.
    async fn follow_user(&self, user: &UnifiedUser) -> Result<Option<String>, FeedError>;

    async fn unfollow_user(&self, user: &UnifiedUser) -> Result<(), FeedError>;

    /// Exchange the refresh credential for a new access token.
    async fn refresh_credentials(&self) -> Result<(), FeedError>;

    /// Returns true if `post` was produced by this adapter's network.
    fn owns(&self, post: &Post) -> bool {
        post.network == self.network()
    }

    /// Dispatch an [`Action`] to the matching call.
    async fn act(
        &self,
        post: &Post,
        action: Action,
        undo: Option<&str>,
    ) -> Result<Option<String>, FeedError> {
        match action {
            Action::Like => self.like(post).await,
            Action::Unlike => self.unlike(post, undo).await,
            Action::Repost => self.repost(post).await,
            Action::Unrepost => self.unrepost(post, undo).await,
            Action::Bookmark => self.bookmark(post).await,
            Action::Unbookmark => self.unbookmark(post).await,
        }
    }
}
