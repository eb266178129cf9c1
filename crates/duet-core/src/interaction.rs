//! Viewer interaction state, keyed by post id.
//!
//! State is derived from the first post seen for an id and from then on only
//! changes through [`InteractionStore::mutate`]. Later fetches of the same
//! post never overwrite a locally mutated entry.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Action, FeedError, Post, SocialAdapter, UndoTokens};

/// Like/repost/bookmark flags plus the counters they affect.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InteractionState {
    pub is_liked: bool,
    pub is_reposted: bool,
    pub is_bookmarked: bool,
    pub like_count: Option<u64>,
    pub repost_count: Option<u64>,
    pub undo: UndoTokens,
}

impl InteractionState {
    /// Initial state for a freshly fetched post.
    pub fn derive_from_post(post: &Post) -> Self {
        Self {
            is_liked: post.viewer.liked,
            is_reposted: post.viewer.reposted,
            is_bookmarked: post.viewer.bookmarked,
            like_count: post.counts.likes,
            repost_count: post.counts.reposts,
            undo: post.undo.clone(),
        }
    }

    /// Returns true if applying `action` would change nothing.
    pub fn already(&self, action: Action) -> bool {
        match action {
            Action::Like => self.is_liked,
            Action::Unlike => !self.is_liked,
            Action::Repost => self.is_reposted,
            Action::Unrepost => !self.is_reposted,
            Action::Bookmark => self.is_bookmarked,
            Action::Unbookmark => !self.is_bookmarked,
        }
    }

    /// The optimistic result of `action`. Absent counters stay absent.
    pub fn applied(&self, action: Action) -> Self {
        let mut next = self.clone();
        if self.already(action) {
            return next;
        }
        match action {
            Action::Like => {
                next.is_liked = true;
                next.like_count = next.like_count.map(|c| c + 1);
            }
            Action::Unlike => {
                next.is_liked = false;
                next.like_count = next.like_count.map(|c| c.saturating_sub(1));
                next.undo.like = None;
            }
            Action::Repost => {
                next.is_reposted = true;
                next.repost_count = next.repost_count.map(|c| c + 1);
            }
            Action::Unrepost => {
                next.is_reposted = false;
                next.repost_count = next.repost_count.map(|c| c.saturating_sub(1));
                next.undo.repost = None;
            }
            Action::Bookmark => next.is_bookmarked = true,
            Action::Unbookmark => next.is_bookmarked = false,
        }
        next
    }

    fn undo_token(&self, action: Action) -> Option<&str> {
        match action {
            Action::Unlike => self.undo.like.as_deref(),
            Action::Unrepost => self.undo.repost.as_deref(),
            _ => None,
        }
    }
}

/// Process-wide interaction cache.
///
/// Safe for concurrent use; each key is guarded by its own shard lock so no
/// cross-key locking is involved.
#[derive(Debug, Default)]
pub struct InteractionStore {
    states: DashMap<String, InteractionState>,
}

impl InteractionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state for `post`, deriving it on first sight.
    pub fn state_for(&self, post: &Post) -> InteractionState {
        self.states
            .entry(post.id.clone())
            .or_insert_with(|| InteractionState::derive_from_post(post))
            .clone()
    }

    /// Seed state for every post in a page without touching existing entries.
    pub fn observe<'a>(&self, posts: impl IntoIterator<Item = &'a Post>) {
        for post in posts {
            self.states
                .entry(post.id.clone())
                .or_insert_with(|| InteractionState::derive_from_post(post));
        }
    }

    pub fn get(&self, id: &str) -> Option<InteractionState> {
        self.states.get(id).map(|s| s.clone())
    }

    /// Mutate an existing entry in place. Returns the new state.
    pub fn mutate<F>(&self, id: &str, f: F) -> Option<InteractionState>
    where
        F: FnOnce(&mut InteractionState),
    {
        let mut entry = self.states.get_mut(id)?;
        f(&mut entry);
        Some(entry.clone())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear(&self) {
        self.states.clear();
    }

    /// Apply `action` optimistically, call the adapter, and settle the result.
    ///
    /// On success the undo token returned by the network is stored. On
    /// failure the entry is restored to its previous value and the error is
    /// returned. Posts from another network and actions that would change
    /// nothing return the current state without a request.
    pub async fn perform(
        &self,
        adapter: &dyn SocialAdapter,
        post: &Post,
        action: Action,
    ) -> Result<InteractionState, FeedError> {
        let previous = self.state_for(post);
        if !adapter.owns(post) || previous.already(action) {
            return Ok(previous);
        }

        let optimistic = previous.applied(action);
        self.states.insert(post.id.clone(), optimistic);

        let result = adapter
            .act(post, action, previous.undo_token(action))
            .await;
        match result {
            Ok(token) => {
                debug!(post = %post.id, %action, "interaction applied");
                let settled = self.mutate(&post.id, |state| match action {
                    Action::Like if token.is_some() => state.undo.like = token,
                    Action::Repost if token.is_some() => state.undo.repost = token,
                    _ => {}
                });
                Ok(settled.unwrap_or_else(|| previous.applied(action)))
            }
            Err(e) => {
                warn!(post = %post.id, %action, error = %e, "interaction failed, rolling back");
                self.states.insert(post.id.clone(), previous);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::post;
    use crate::{Cursor, Network, Page, ThreadItem, UnifiedUser};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct FakeAdapter {
        fail: bool,
        calls: Mutex<Vec<(Action, Option<String>)>>,
    }

    impl FakeAdapter {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn record(&self, action: Action, undo: Option<&str>) -> Result<Option<String>, FeedError> {
            self.calls
                .lock()
                .unwrap()
                .push((action, undo.map(str::to_string)));
            if self.fail {
                Err(FeedError::Network("offline".to_string()))
            } else {
                Ok(Some(format!("{action}-token")))
            }
        }
    }

    #[async_trait]
    impl SocialAdapter for FakeAdapter {
        fn network(&self) -> Network {
            Network::Mastodon
        }
        async fn viewer_id(&self) -> Option<String> {
            None
        }
        async fn fetch_home_timeline(&self, _: Option<&Cursor>) -> Result<Page, FeedError> {
            unimplemented!()
        }
        async fn fetch_thread(&self, _: &Post) -> Result<Vec<ThreadItem>, FeedError> {
            unimplemented!()
        }
        async fn fetch_ancestors(&self, _: &Post) -> Result<Vec<Post>, FeedError> {
            unimplemented!()
        }
        async fn fetch_post(&self, _: &str) -> Result<Post, FeedError> {
            unimplemented!()
        }
        async fn fetch_user_profile(&self, _: &str) -> Result<UnifiedUser, FeedError> {
            unimplemented!()
        }
        async fn fetch_author_feed(&self, _: &str, _: Option<&Cursor>) -> Result<Page, FeedError> {
            unimplemented!()
        }
        async fn like(&self, _: &Post) -> Result<Option<String>, FeedError> {
            self.record(Action::Like, None)
        }
        async fn unlike(&self, _: &Post, undo: Option<&str>) -> Result<Option<String>, FeedError> {
            self.record(Action::Unlike, undo)
        }
        async fn repost(&self, _: &Post) -> Result<Option<String>, FeedError> {
            self.record(Action::Repost, None)
        }
        async fn unrepost(
            &self,
            _: &Post,
            undo: Option<&str>,
        ) -> Result<Option<String>, FeedError> {
            self.record(Action::Unrepost, undo)
        }
        async fn follow_user(&self, _: &UnifiedUser) -> Result<Option<String>, FeedError> {
            unimplemented!()
        }
        async fn unfollow_user(&self, _: &UnifiedUser) -> Result<(), FeedError> {
            unimplemented!()
        }
        async fn refresh_credentials(&self) -> Result<(), FeedError> {
            Ok(())
        }
    }

    fn counted_post(id: &str) -> Post {
        let mut p = post(id);
        p.counts.likes = Some(3);
        p.counts.reposts = None;
        p
    }

    #[test]
    fn test_derive_once_never_clobbers() {
        let store = InteractionStore::new();
        let p = counted_post("mastodon:1");
        store.state_for(&p);
        store.mutate(&p.id, |s| s.is_liked = true);

        let mut refetched = counted_post("mastodon:1");
        refetched.counts.likes = Some(10);
        store.observe([&refetched]);

        let state = store.state_for(&refetched);
        assert!(state.is_liked);
        assert_eq!(state.like_count, Some(3));
    }

    #[test]
    fn test_absent_counts_stay_absent() {
        let state = InteractionState::derive_from_post(&counted_post("mastodon:1"));
        let reposted = state.applied(Action::Repost);
        assert!(reposted.is_reposted);
        assert_eq!(reposted.repost_count, None);
        assert_eq!(state.applied(Action::Like).like_count, Some(4));
    }

    #[test]
    fn test_mutate_missing_key() {
        let store = InteractionStore::new();
        assert_eq!(store.mutate("mastodon:404", |s| s.is_liked = true), None);
    }

    #[tokio::test]
    async fn test_perform_success_stores_token() {
        let store = InteractionStore::new();
        let adapter = FakeAdapter::new(false);
        let p = counted_post("mastodon:1");

        let state = store.perform(&adapter, &p, Action::Like).await.unwrap();
        assert!(state.is_liked);
        assert_eq!(state.like_count, Some(4));
        assert_eq!(state.undo.like.as_deref(), Some("like-token"));

        let state = store.perform(&adapter, &p, Action::Unlike).await.unwrap();
        assert!(!state.is_liked);
        assert_eq!(state.like_count, Some(3));

        let calls = adapter.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                (Action::Like, None),
                (Action::Unlike, Some("like-token".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn test_perform_failure_rolls_back() {
        let store = InteractionStore::new();
        let adapter = FakeAdapter::new(true);
        let p = counted_post("mastodon:1");

        let err = store.perform(&adapter, &p, Action::Like).await.unwrap_err();
        assert_eq!(err, FeedError::Network("offline".to_string()));
        assert_eq!(store.get(&p.id), Some(InteractionState::derive_from_post(&p)));
    }

    #[tokio::test]
    async fn test_perform_skips_foreign_and_redundant() {
        let store = InteractionStore::new();
        let adapter = FakeAdapter::new(false);

        let mut foreign = counted_post("bluesky:at://x");
        foreign.network = Network::Bluesky;
        let state = store.perform(&adapter, &foreign, Action::Like).await.unwrap();
        assert!(!state.is_liked);

        let mut liked = counted_post("mastodon:2");
        liked.viewer.liked = true;
        store.perform(&adapter, &liked, Action::Like).await.unwrap();

        assert!(adapter.calls.lock().unwrap().is_empty());
    }
}
