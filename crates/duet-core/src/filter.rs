//! Follow-graph reply filter for home timelines.
//!
//! A reply only belongs in the home timeline when the viewer follows the
//! author of the post being replied to. Reposts are never filtered, the
//! viewer's own posts are always kept, and a reply whose parent author cannot
//! be resolved is dropped.

use std::collections::HashSet;
use std::future::Future;

use tracing::debug;

/// Default upper bound on FollowSet size.
pub const DEFAULT_FOLLOW_CAP: usize = 2_000;

/// A bounded snapshot of the accounts the viewer follows.
#[derive(Debug, Clone)]
pub struct FollowSet {
    ids: HashSet<String>,
    cap: usize,
    truncated: bool,
}

impl FollowSet {
    pub fn new(cap: usize) -> Self {
        Self {
            ids: HashSet::new(),
            cap,
            truncated: false,
        }
    }

    /// Insert a native account id. Returns false once the cap is reached.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        if self.ids.len() >= self.cap {
            self.truncated = true;
            return false;
        }
        self.ids.insert(id.into());
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ids.len() >= self.cap
    }

    /// True if members were dropped because of the cap.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

/// Page through a follow list until it is exhausted or the cap is reached.
///
/// `fetch_page` receives the cursor for the next page and returns the ids on
/// that page plus the following cursor. Pages are fetched sequentially.
pub async fn collect_follow_set<F, Fut, E>(cap: usize, mut fetch_page: F) -> Result<FollowSet, E>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<(Vec<String>, Option<String>), E>>,
{
    let mut follows = FollowSet::new(cap);
    let mut cursor: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let (ids, next) = fetch_page(cursor.clone()).await?;
        pages += 1;

        if ids.is_empty() {
            break;
        }
        for id in ids {
            if !follows.insert(id) {
                break;
            }
        }
        if follows.is_full() {
            // Later pages would have been cut off.
            if next.is_some() {
                follows.truncated = true;
            }
            break;
        }
        match next {
            Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
            _ => break,
        }
    }

    debug!(
        count = follows.len(),
        pages,
        truncated = follows.is_truncated(),
        "collected follow set"
    );
    Ok(follows)
}

/// The fields the reply filter looks at for one feed item.
#[derive(Debug, Clone, Default)]
pub struct ReplyCandidate {
    /// Native id of the item's author (the booster for reposts).
    pub author_id: String,
    pub is_repost: bool,
    /// The item says it is a reply, whether or not the parent resolved.
    pub declares_reply: bool,
    /// Native id of the parent post's author, when resolvable.
    pub parent_author_id: Option<String>,
    /// Viewer-relative following flag carried on the parent author object.
    pub parent_author_following: Option<bool>,
}

impl ReplyCandidate {
    /// Decide without a FollowSet. `None` means a membership lookup is needed.
    pub fn decide(&self, viewer_id: Option<&str>) -> Option<bool> {
        if self.is_repost || !self.declares_reply {
            return Some(true);
        }
        if viewer_id.is_some_and(|v| v == self.author_id) {
            return Some(true);
        }
        let Some(parent_author) = self.parent_author_id.as_deref() else {
            return Some(false);
        };
        if self.parent_author_following == Some(true) {
            return Some(true);
        }
        if viewer_id.is_some_and(|v| v == parent_author) {
            return Some(true);
        }
        None
    }

    /// Full decision, consulting `follows` when the item itself is not enough.
    ///
    /// A missing FollowSet is treated as empty.
    pub fn include(&self, viewer_id: Option<&str>, follows: Option<&FollowSet>) -> bool {
        match self.decide(viewer_id) {
            Some(verdict) => verdict,
            None => match (self.parent_author_id.as_deref(), follows) {
                (Some(parent), Some(follows)) => follows.contains(parent),
                _ => false,
            },
        }
    }
}

/// Returns true if any candidate needs a FollowSet to be decided.
pub fn needs_follow_set<'a>(
    candidates: impl IntoIterator<Item = &'a ReplyCandidate>,
    viewer_id: Option<&str>,
) -> bool {
    candidates
        .into_iter()
        .any(|c| c.decide(viewer_id).is_none())
}

/// Keep the items that belong in the home timeline, preserving order.
pub fn retain_home_items<T>(
    items: Vec<(T, ReplyCandidate)>,
    viewer_id: Option<&str>,
    follows: Option<&FollowSet>,
) -> Vec<T> {
    let before = items.len();
    let kept: Vec<T> = items
        .into_iter()
        .filter(|(_, candidate)| candidate.include(viewer_id, follows))
        .map(|(item, _)| item)
        .collect();
    if kept.len() != before {
        debug!(
            dropped = before - kept.len(),
            kept = kept.len(),
            "filtered replies to unfollowed accounts"
        );
    }
    kept
}
