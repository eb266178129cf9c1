//! Aggregator behaviour against in-process fake adapters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use duet_core::{
    Author, Cursor, Engagement, FeedError, InteractionStore, Network, Page, Post, SocialAdapter,
    StyledText, ThreadItem, UndoTokens, UnifiedUser, ViewerState,
};
use duet_timeline::{
    Aggregator, Snapshot, SnapshotError, SnapshotMeta, SnapshotStore, TimelineError,
};
use pretty_assertions::assert_eq;
use tokio::sync::Notify;

fn post(network: Network, native: &str, minute: i64) -> Post {
    Post {
        id: network.global_id(native),
        network,
        instance: "test".to_string(),
        native_id: native.to_string(),
        native_cid: None,
        author: Author {
            id: "author".to_string(),
            handle: "author.test".to_string(),
            display_name: None,
            avatar: None,
        },
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute),
        text: StyledText::plain(native),
        media: Vec::new(),
        quote: None,
        content_warning: None,
        labels: Vec::new(),
        counts: Engagement {
            likes: Some(1),
            ..Engagement::default()
        },
        reply_parent_id: None,
        reposted_by: None,
        undo: UndoTokens::default(),
        viewer: ViewerState::default(),
    }
}

/// Serves canned pages keyed by cursor (`""` for the first page).
struct FakeFeed {
    network: Network,
    pages: Mutex<HashMap<String, Page>>,
    fetches: AtomicUsize,
    /// Number of upcoming fetches that fail with an expired token.
    auth_failures: AtomicUsize,
    refresh_ok: bool,
    refreshes: AtomicUsize,
    failure: Mutex<Option<FeedError>>,
    /// Fetches for this cursor wait on `release` after signalling `entered`.
    gate: Option<(String, Arc<Notify>, Arc<Notify>)>,
}

impl FakeFeed {
    fn new(network: Network) -> Self {
        Self {
            network,
            pages: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
            auth_failures: AtomicUsize::new(0),
            refresh_ok: true,
            refreshes: AtomicUsize::new(0),
            failure: Mutex::new(None),
            gate: None,
        }
    }

    fn page(self, cursor: &str, posts: Vec<Post>, next: Option<&str>) -> Self {
        self.set_page(cursor, posts, next);
        self
    }

    fn set_page(&self, cursor: &str, posts: Vec<Post>, next: Option<&str>) {
        self.pages.lock().unwrap().insert(
            cursor.to_string(),
            Page {
                posts,
                next_cursor: next.map(Cursor::new),
            },
        );
    }

    fn fail_with(&self, error: Option<FeedError>) {
        *self.failure.lock().unwrap() = error;
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SocialAdapter for FakeFeed {
    fn network(&self) -> Network {
        self.network
    }
    async fn viewer_id(&self) -> Option<String> {
        Some("me".to_string())
    }
    async fn fetch_home_timeline(&self, cursor: Option<&Cursor>) -> Result<Page, FeedError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let key = cursor.map(|c| c.as_str().to_string()).unwrap_or_default();

        if let Some((gated, entered, release)) = &self.gate {
            if *gated == key {
                entered.notify_one();
                release.notified().await;
            }
        }
        if self
            .auth_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(FeedError::AuthExpired { status: 401 });
        }
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self
            .pages
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default())
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
        Ok(None)
    }
    async fn unlike(&self, _: &Post, _: Option<&str>) -> Result<Option<String>, FeedError> {
        Ok(None)
    }
    async fn repost(&self, _: &Post) -> Result<Option<String>, FeedError> {
        Ok(None)
    }
    async fn unrepost(&self, _: &Post, _: Option<&str>) -> Result<Option<String>, FeedError> {
        Ok(None)
    }
    async fn follow_user(&self, _: &UnifiedUser) -> Result<Option<String>, FeedError> {
        unimplemented!()
    }
    async fn unfollow_user(&self, _: &UnifiedUser) -> Result<(), FeedError> {
        unimplemented!()
    }
    async fn refresh_credentials(&self) -> Result<(), FeedError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.refresh_ok {
            Ok(())
        } else {
            Err(FeedError::AuthExpired { status: 401 })
        }
    }
}

fn ids(posts: &[Post]) -> Vec<&str> {
    posts.iter().map(|p| p.id.as_str()).collect()
}

fn aggregator(adapters: Vec<Arc<FakeFeed>>) -> Aggregator {
    let adapters = adapters
        .into_iter()
        .map(|a| a as Arc<dyn SocialAdapter>)
        .collect();
    Aggregator::new(adapters, Arc::new(InteractionStore::new()))
}

fn two_networks() -> (Arc<FakeFeed>, Arc<FakeFeed>) {
    let mastodon = FakeFeed::new(Network::Mastodon)
        .page(
            "",
            vec![post(Network::Mastodon, "m3", 30), post(Network::Mastodon, "m1", 10)],
            Some("m-p2"),
        )
        .page("m-p2", vec![post(Network::Mastodon, "m0", 5)], None);
    let bluesky = FakeFeed::new(Network::Bluesky)
        .page(
            "",
            vec![post(Network::Bluesky, "b2", 20), post(Network::Bluesky, "b0", 0)],
            Some("b-p2"),
        )
        .page("b-p2", vec![post(Network::Bluesky, "b-1", -5)], Some("b-p3"));
    (Arc::new(mastodon), Arc::new(bluesky))
}

#[tokio::test]
async fn test_refresh_merges_and_is_idempotent() {
    let (mastodon, bluesky) = two_networks();
    let aggregator = aggregator(vec![mastodon, bluesky]);

    let first = aggregator.refresh().await.unwrap();
    assert_eq!(
        ids(&first.posts),
        vec!["mastodon:m3", "bluesky:b2", "mastodon:m1", "bluesky:b0"]
    );
    assert!(first.errors.is_empty());

    let second = aggregator.refresh().await.unwrap();
    assert_eq!(ids(&second.posts), ids(&first.posts));
}

#[tokio::test]
async fn test_refresh_observes_interaction_state() {
    let (mastodon, bluesky) = two_networks();
    let aggregator = aggregator(vec![mastodon, bluesky]);

    aggregator.refresh().await.unwrap();
    let state = aggregator.interactions().get("mastodon:m3").unwrap();
    assert_eq!(state.like_count, Some(1));
    assert_eq!(state.repost_count, None);
}

#[tokio::test]
async fn test_load_more_appends_and_skips_exhausted() {
    let (mastodon, bluesky) = two_networks();
    let aggregator = aggregator(vec![mastodon.clone(), bluesky.clone()]);

    aggregator.refresh().await.unwrap();
    let update = aggregator.load_more().await.unwrap();
    assert_eq!(
        ids(&update.posts),
        vec![
            "mastodon:m3",
            "bluesky:b2",
            "mastodon:m1",
            "mastodon:m0",
            "bluesky:b0",
            "bluesky:b-1"
        ]
    );

    // Mastodon returned no cursor, so only Bluesky is asked again.
    aggregator.load_more().await.unwrap();
    assert_eq!(mastodon.fetches(), 2);
    assert_eq!(bluesky.fetches(), 3);
}

#[tokio::test]
async fn test_expired_token_refreshes_once_and_retries() {
    let (mastodon, bluesky) = two_networks();
    mastodon.auth_failures.store(1, Ordering::SeqCst);
    let aggregator = aggregator(vec![mastodon.clone(), bluesky]);

    let update = aggregator.refresh().await.unwrap();
    assert_eq!(update.posts.len(), 4);
    assert!(update.terminated.is_empty());
    assert_eq!(mastodon.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(mastodon.fetches(), 2);
}

#[tokio::test]
async fn test_failed_refresh_ends_only_that_session() {
    let mastodon = FakeFeed {
        refresh_ok: false,
        ..FakeFeed::new(Network::Mastodon)
    }
    .page("", vec![post(Network::Mastodon, "m1", 10)], None);
    let mastodon = Arc::new(mastodon);
    let (_, bluesky) = two_networks();
    let aggregator = aggregator(vec![mastodon.clone(), bluesky]);

    aggregator.refresh().await.unwrap();
    mastodon.auth_failures.store(1, Ordering::SeqCst);

    let update = aggregator.refresh().await.unwrap();
    assert_eq!(update.terminated, vec![Network::Mastodon]);
    assert_eq!(ids(&update.posts), vec!["bluesky:b2", "bluesky:b0"]);
    assert_eq!(aggregator.active_networks().await, vec![Network::Bluesky]);

    // The ended session is not asked again.
    let fetches = mastodon.fetches();
    aggregator.refresh().await.unwrap();
    assert_eq!(mastodon.fetches(), fetches);
}

#[tokio::test]
async fn test_partial_failure_keeps_results() {
    let (mastodon, bluesky) = two_networks();
    bluesky.fail_with(Some(FeedError::Network("connection reset".to_string())));
    let aggregator = aggregator(vec![mastodon, bluesky]);

    let update = aggregator.refresh().await.unwrap();
    assert_eq!(ids(&update.posts), vec!["mastodon:m3", "mastodon:m1"]);
    assert_eq!(update.errors.len(), 1);
    assert_eq!(update.errors[0].network, Network::Bluesky);
    assert!(aggregator.last_error(Network::Bluesky).await.is_some());
}

#[tokio::test]
async fn test_all_networks_failing_is_an_error_and_keeps_posts() {
    let (mastodon, bluesky) = two_networks();
    let aggregator = aggregator(vec![mastodon.clone(), bluesky.clone()]);
    aggregator.refresh().await.unwrap();

    mastodon.fail_with(Some(FeedError::Network("down".to_string())));
    bluesky.fail_with(Some(FeedError::from_status(502, "bad gateway")));

    let err = aggregator.refresh().await.unwrap_err();
    match err {
        TimelineError::AllNetworksFailed(failures) => assert_eq!(failures.len(), 2),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(aggregator.posts().await.len(), 4);
}

#[tokio::test]
async fn test_no_adapters_is_empty_not_an_error() {
    let aggregator = aggregator(Vec::new());
    let update = aggregator.refresh().await.unwrap();
    assert!(update.posts.is_empty());
    assert!(update.errors.is_empty());
}

#[tokio::test]
async fn test_stale_load_more_cannot_reintroduce_old_posts() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let feed = FakeFeed {
        gate: Some(("p2".to_string(), entered.clone(), release.clone())),
        ..FakeFeed::new(Network::Mastodon)
    }
    .page(
        "",
        vec![post(Network::Mastodon, "old2", 20), post(Network::Mastodon, "old1", 10)],
        Some("p2"),
    )
    .page("p2", vec![post(Network::Mastodon, "old0", 0)], None);
    let feed = Arc::new(feed);
    let aggregator = Arc::new(aggregator(vec![feed.clone()]));

    aggregator.refresh().await.unwrap();

    let slow = tokio::spawn({
        let aggregator = aggregator.clone();
        async move { aggregator.load_more().await }
    });
    entered.notified().await;

    feed.set_page("", vec![post(Network::Mastodon, "new", 50)], Some("q2"));
    let refreshed = aggregator.refresh().await.unwrap();
    assert_eq!(ids(&refreshed.posts), vec!["mastodon:new"]);

    release.notify_one();
    let stale = slow.await.unwrap().unwrap();
    assert!(stale.stale);
    assert_eq!(ids(&aggregator.posts().await), vec!["mastodon:new"]);
}

#[tokio::test]
async fn test_replaced_adapter_ignores_old_session_results() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let old = FakeFeed {
        gate: Some((String::new(), entered.clone(), release.clone())),
        ..FakeFeed::new(Network::Mastodon)
    }
    .page("", vec![post(Network::Mastodon, "old-account", 20)], Some("old-cursor"));
    let aggregator = Arc::new(aggregator(vec![Arc::new(old)]));

    let slow = tokio::spawn({
        let aggregator = aggregator.clone();
        async move { aggregator.refresh().await }
    });
    entered.notified().await;

    let fresh = Arc::new(FakeFeed::new(Network::Mastodon).page(
        "",
        vec![post(Network::Mastodon, "fresh", 30)],
        None,
    ));
    aggregator.replace_adapter(fresh.clone()).await;

    release.notify_one();
    let update = slow.await.unwrap().unwrap();
    assert!(update.posts.is_empty());
    assert!(aggregator.posts().await.is_empty());

    // The new session starts from page one, not the old session's cursor.
    let next = aggregator.load_more().await.unwrap();
    assert_eq!(ids(&next.posts), vec!["mastodon:fresh"]);
    assert_eq!(fresh.fetches(), 1);
}

#[tokio::test]
async fn test_load_more_if_needed_collapses_concurrent_triggers() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let feed = FakeFeed {
        gate: Some(("p2".to_string(), entered.clone(), release.clone())),
        ..FakeFeed::new(Network::Mastodon)
    }
    .page("", vec![post(Network::Mastodon, "a", 20)], Some("p2"))
    .page("p2", vec![post(Network::Mastodon, "b", 10)], None);
    let feed = Arc::new(feed);
    let aggregator = Arc::new(aggregator(vec![feed.clone()]));
    aggregator.refresh().await.unwrap();

    // Far from the end: nothing happens.
    assert!(aggregator.load_more_if_needed(0, 100).await.unwrap().is_none());

    let first = tokio::spawn({
        let aggregator = aggregator.clone();
        async move { aggregator.load_more_if_needed(0, 1).await }
    });
    entered.notified().await;

    assert!(aggregator.load_more_if_needed(0, 1).await.unwrap().is_none());

    release.notify_one();
    let update = first.await.unwrap().unwrap().unwrap();
    assert_eq!(ids(&update.posts), vec!["mastodon:a", "mastodon:b"]);
    assert_eq!(feed.fetches(), 2);
}

#[derive(Default)]
struct MemoryStore {
    saved: Mutex<Option<Snapshot>>,
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn save(&self, posts: &[Post], meta: &SnapshotMeta) -> Result<(), SnapshotError> {
        *self.saved.lock().unwrap() = Some(Snapshot {
            posts: posts.to_vec(),
            meta: meta.clone(),
        });
        Ok(())
    }

    async fn load(&self) -> Result<Option<Snapshot>, SnapshotError> {
        Ok(self.saved.lock().unwrap().clone())
    }
}

#[tokio::test]
async fn test_snapshot_round_trip_resumes_cursors() {
    let (mastodon, bluesky) = two_networks();
    let store = MemoryStore::default();

    let source = aggregator(vec![mastodon.clone(), bluesky.clone()]);
    source.refresh().await.unwrap();
    source.save_to(&store).await.unwrap();

    let meta = store.saved.lock().unwrap().as_ref().unwrap().meta.clone();
    assert_eq!(meta.cursors.get(&Network::Bluesky), Some(&Cursor::new("b-p2")));
    assert_eq!(
        meta.newest_ids.get(&Network::Mastodon).map(String::as_str),
        Some("mastodon:m3")
    );

    let restored = aggregator(vec![mastodon, bluesky]);
    assert!(restored.restore_from(&store).await.unwrap());
    assert_eq!(ids(&restored.posts().await), ids(&source.posts().await));

    let update = restored.load_more().await.unwrap();
    assert!(update.posts.iter().any(|p| p.id == "bluesky:b-1"));
}

#[tokio::test]
async fn test_restore_from_empty_store() {
    let aggregator = aggregator(Vec::new());
    assert!(!aggregator.restore_from(&MemoryStore::default()).await.unwrap());
}
