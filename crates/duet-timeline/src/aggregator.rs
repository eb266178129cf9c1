//! The multi-network timeline aggregator.
//!
//! Each network keeps its own cursor and accumulated page list; the merged
//! view is rebuilt from those lists after every applied fetch. Fetches run
//! concurrently and are applied under a single write lock.
//!
//! A refresh starts a new generation. Pages fetched for an older generation
//! are discarded when they arrive, so a slow `load_more` can never put
//! pre-refresh posts back into a refreshed timeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use duet_core::{Cursor, FeedError, InteractionStore, Network, Page, Post, SocialAdapter};
use futures_util::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::merge::merge;
use crate::{NetworkFailure, Snapshot, SnapshotMeta, SnapshotStore, TimelineError};

/// How close to the end of the list a visible index must be to load more.
pub const DEFAULT_LOAD_MORE_THRESHOLD: usize = 5;

/// Result of an aggregate fetch.
#[derive(Debug, Clone, Default)]
pub struct TimelineUpdate {
    /// The merged timeline after the fetch.
    pub posts: Vec<Post>,
    /// Networks that failed, for display. The posts above still include
    /// whatever those networks contributed before.
    pub errors: Vec<NetworkFailure>,
    /// Networks whose session ended during this fetch.
    pub terminated: Vec<Network>,
    /// The fetch was superseded by a refresh and its pages were dropped.
    pub stale: bool,
}

struct Slot {
    adapter: Arc<dyn SocialAdapter>,
    cursor: Option<Cursor>,
    posts: Vec<Post>,
    exhausted: bool,
    session_invalid: bool,
    last_error: Option<FeedError>,
}

impl Slot {
    fn new(adapter: Arc<dyn SocialAdapter>) -> Self {
        Self {
            adapter,
            cursor: None,
            posts: Vec::new(),
            exhausted: false,
            session_invalid: false,
            last_error: None,
        }
    }

    fn network(&self) -> Network {
        self.adapter.network()
    }
}

struct State {
    slots: Vec<Slot>,
    merged: Vec<Post>,
    /// Generation the slot cursors and pages belong to.
    applied: u64,
}

impl State {
    fn remerge(&mut self) {
        self.merged = merge(
            self.slots
                .iter()
                .filter(|s| !s.session_invalid)
                .map(|s| s.posts.iter().cloned()),
        );
    }
}

enum Outcome {
    Page(Page),
    Failed(FeedError),
    /// Credentials were rejected and could not be refreshed.
    Terminated(FeedError),
}

struct Fetched {
    slot: usize,
    /// The adapter that served the fetch.
    adapter: Arc<dyn SocialAdapter>,
    cursor: Option<Cursor>,
    outcome: Outcome,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Reset,
    Append,
}

/// Merges home timelines from several adapters.
pub struct Aggregator {
    state: Arc<RwLock<State>>,
    generation: AtomicU64,
    loading: AtomicBool,
    interactions: Arc<InteractionStore>,
    threshold: usize,
}

impl Aggregator {
    /// Create an aggregator over the given adapters.
    ///
    /// Networks without an adapter simply contribute nothing.
    pub fn new(adapters: Vec<Arc<dyn SocialAdapter>>, interactions: Arc<InteractionStore>) -> Self {
        Self {
            state: Arc::new(RwLock::new(State {
                slots: adapters.into_iter().map(Slot::new).collect(),
                merged: Vec::new(),
                applied: 0,
            })),
            generation: AtomicU64::new(0),
            loading: AtomicBool::new(false),
            interactions,
            threshold: DEFAULT_LOAD_MORE_THRESHOLD,
        }
    }

    pub fn with_load_more_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn interactions(&self) -> &Arc<InteractionStore> {
        &self.interactions
    }

    /// The current merged timeline.
    pub async fn posts(&self) -> Vec<Post> {
        self.state.read().await.merged.clone()
    }

    /// The networks currently contributing to the merge.
    pub async fn active_networks(&self) -> Vec<Network> {
        self.state
            .read()
            .await
            .slots
            .iter()
            .filter(|s| !s.session_invalid)
            .map(Slot::network)
            .collect()
    }

    /// The adapter serving `network`, if its session is live.
    pub async fn adapter(&self, network: Network) -> Option<Arc<dyn SocialAdapter>> {
        self.state
            .read()
            .await
            .slots
            .iter()
            .find(|s| s.network() == network && !s.session_invalid)
            .map(|s| s.adapter.clone())
    }

    /// The last error recorded for `network`, cleared by its next success.
    pub async fn last_error(&self, network: Network) -> Option<FeedError> {
        self.state
            .read()
            .await
            .slots
            .iter()
            .find(|s| s.network() == network)
            .and_then(|s| s.last_error.clone())
    }

    /// Install a freshly authenticated adapter, replacing any previous one
    /// for the same network.
    ///
    /// Results still in flight from the old adapter are dropped when they
    /// arrive.
    pub async fn replace_adapter(&self, adapter: Arc<dyn SocialAdapter>) {
        let network = adapter.network();
        let mut state = self.state.write().await;
        match state.slots.iter_mut().find(|s| s.network() == network) {
            Some(slot) => *slot = Slot::new(adapter),
            None => state.slots.push(Slot::new(adapter)),
        }
        state.remerge();
        info!(%network, "adapter replaced");
    }

    /// Reset every cursor and fetch the first page from each network.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> Result<TimelineUpdate, TimelineError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let targets: Vec<_> = {
            let state = self.state.read().await;
            state
                .slots
                .iter()
                .enumerate()
                .filter(|(_, s)| !s.session_invalid)
                .map(|(i, s)| (i, s.adapter.clone(), None))
                .collect()
        };

        let fetched = fetch_all(targets).await;
        self.apply(generation, Mode::Reset, fetched).await
    }

    /// Fetch the next page from every network that has one.
    #[tracing::instrument(skip(self))]
    pub async fn load_more(&self) -> Result<TimelineUpdate, TimelineError> {
        let (generation, targets) = {
            let state = self.state.read().await;
            let targets: Vec<_> = state
                .slots
                .iter()
                .enumerate()
                .filter(|(_, s)| !s.session_invalid && !s.exhausted)
                .map(|(i, s)| (i, s.adapter.clone(), s.cursor.clone()))
                .collect();
            (state.applied, targets)
        };

        if targets.is_empty() {
            debug!("every network is exhausted");
            return Ok(TimelineUpdate {
                posts: self.posts().await,
                ..TimelineUpdate::default()
            });
        }

        let fetched = fetch_all(targets).await;
        self.apply(generation, Mode::Append, fetched).await
    }

    /// Load more when `visible_index` is near the end of a list of `len`
    /// posts.
    ///
    /// Returns `None` when not near the end or when a load is already in
    /// flight; concurrent triggers collapse into one fetch.
    pub async fn load_more_if_needed(
        &self,
        visible_index: usize,
        len: usize,
    ) -> Result<Option<TimelineUpdate>, TimelineError> {
        if len == 0 || visible_index.saturating_add(self.threshold) < len {
            return Ok(None);
        }
        if self.loading.swap(true, Ordering::SeqCst) {
            debug!("load more already in flight");
            return Ok(None);
        }
        let _in_flight = InFlight(&self.loading);
        self.load_more().await.map(Some)
    }

    async fn apply(
        &self,
        generation: u64,
        mode: Mode,
        fetched: Vec<Fetched>,
    ) -> Result<TimelineUpdate, TimelineError> {
        let mut state = self.state.write().await;

        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "discarding pages from a superseded generation");
            return Ok(TimelineUpdate {
                posts: state.merged.clone(),
                stale: true,
                ..TimelineUpdate::default()
            });
        }

        let attempted = fetched.len();
        let mut succeeded = 0;
        let mut errors = Vec::new();
        let mut terminated = Vec::new();

        for Fetched {
            slot: index,
            adapter,
            cursor,
            outcome,
        } in fetched
        {
            let slot = &mut state.slots[index];
            let network = slot.network();
            if !std::ptr::addr_eq(Arc::as_ptr(&adapter), Arc::as_ptr(&slot.adapter)) {
                debug!(%network, "adapter replaced during fetch, dropping result");
                continue;
            }
            match outcome {
                Outcome::Page(page) => {
                    if mode == Mode::Append && slot.cursor != cursor {
                        debug!(%network, "cursor moved during fetch, dropping page");
                        continue;
                    }
                    succeeded += 1;
                    self.interactions.observe(&page.posts);
                    match mode {
                        Mode::Reset => slot.posts = page.posts,
                        Mode::Append => slot.posts.extend(page.posts),
                    }
                    slot.exhausted = page.next_cursor.is_none();
                    slot.cursor = page.next_cursor;
                    slot.last_error = None;
                }
                Outcome::Failed(error) => {
                    warn!(%network, error = %error, "fetch failed");
                    slot.last_error = Some(error.clone());
                    errors.push(NetworkFailure { network, error });
                }
                Outcome::Terminated(error) => {
                    slot.session_invalid = true;
                    slot.posts.clear();
                    slot.cursor = None;
                    slot.last_error = Some(error.clone());
                    terminated.push(network);
                    errors.push(NetworkFailure { network, error });
                }
            }
        }

        if mode == Mode::Reset {
            state.applied = generation;
        }
        state.remerge();

        if attempted > 0 && succeeded == 0 && !errors.is_empty() {
            return Err(TimelineError::AllNetworksFailed(errors));
        }

        info!(
            posts = state.merged.len(),
            succeeded,
            failed = errors.len(),
            "timeline updated"
        );
        Ok(TimelineUpdate {
            posts: state.merged.clone(),
            errors,
            terminated,
            stale: false,
        })
    }

    /// The merged timeline and its per-network bookkeeping.
    pub async fn snapshot(&self) -> Snapshot {
        let state = self.state.read().await;
        let mut meta = SnapshotMeta {
            cursors: Default::default(),
            newest_ids: Default::default(),
            last_saved: Utc::now(),
        };
        for slot in state.slots.iter().filter(|s| !s.session_invalid) {
            let network = slot.network();
            if let Some(cursor) = &slot.cursor {
                meta.cursors.insert(network, cursor.clone());
            }
            if let Some(newest) = slot.posts.iter().max_by_key(|p| p.created_at) {
                meta.newest_ids.insert(network, newest.id.clone());
            }
        }
        Snapshot {
            posts: state.merged.clone(),
            meta,
        }
    }

    /// Replace the timeline with a saved snapshot.
    ///
    /// Posts from networks without an adapter are dropped. Any fetch in
    /// flight becomes stale.
    pub async fn restore(&self, snapshot: Snapshot) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.write().await;
        for slot in state.slots.iter_mut() {
            let network = slot.network();
            slot.posts = snapshot
                .posts
                .iter()
                .filter(|p| p.network == network)
                .cloned()
                .collect();
            slot.cursor = snapshot.meta.cursors.get(&network).cloned();
            slot.exhausted = false;
            slot.last_error = None;
        }
        state.applied = generation;
        state.remerge();
        self.interactions.observe(&state.merged);
        info!(posts = state.merged.len(), "restored timeline snapshot");
    }

    pub async fn save_to(&self, store: &dyn SnapshotStore) -> Result<(), TimelineError> {
        let snapshot = self.snapshot().await;
        store.save(&snapshot.posts, &snapshot.meta).await?;
        debug!(posts = snapshot.posts.len(), "saved timeline snapshot");
        Ok(())
    }

    /// Restore from `store`. Returns false when nothing was saved.
    pub async fn restore_from(&self, store: &dyn SnapshotStore) -> Result<bool, TimelineError> {
        match store.load().await? {
            Some(snapshot) => {
                self.restore(snapshot).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Clears the in-flight flag when the load finishes or is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn fetch_all(targets: Vec<(usize, Arc<dyn SocialAdapter>, Option<Cursor>)>) -> Vec<Fetched> {
    join_all(targets.into_iter().map(|(slot, adapter, cursor)| async move {
        let outcome = fetch_page(adapter.as_ref(), cursor.as_ref()).await;
        Fetched {
            slot,
            adapter,
            cursor,
            outcome,
        }
    }))
    .await
}

/// Fetch one page, refreshing credentials and retrying once if they were
/// rejected.
async fn fetch_page(adapter: &dyn SocialAdapter, cursor: Option<&Cursor>) -> Outcome {
    let network = adapter.network();
    match adapter.fetch_home_timeline(cursor).await {
        Ok(page) => return Outcome::Page(page),
        Err(e) if !e.is_auth_expired() => return Outcome::Failed(e),
        Err(_) => {}
    }

    info!(%network, "credentials rejected, refreshing");
    if let Err(e) = adapter.refresh_credentials().await {
        warn!(%network, error = %e, "credential refresh failed, ending session");
        return Outcome::Terminated(e);
    }

    match adapter.fetch_home_timeline(cursor).await {
        Ok(page) => Outcome::Page(page),
        Err(e) if e.is_auth_expired() => {
            warn!(%network, "credentials rejected after refresh, ending session");
            Outcome::Terminated(e)
        }
        Err(e) => Outcome::Failed(e),
    }
}
