//! Persisted timeline state.
//!
//! The aggregator only produces and consumes [`Snapshot`] values; where they
//! are stored is up to the [`SnapshotStore`] implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duet_core::{Cursor, Network, Post};
use serde::{Deserialize, Serialize};

use crate::SnapshotError;

/// Bookkeeping saved alongside the posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Next-page cursor per network, absent when exhausted or never loaded.
    #[serde(default)]
    pub cursors: BTreeMap<Network, Cursor>,
    /// Id of the newest post seen per network.
    #[serde(default)]
    pub newest_ids: BTreeMap<Network, String>,
    pub last_saved: DateTime<Utc>,
}

/// A saved merged timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub posts: Vec<Post>,
    pub meta: SnapshotMeta,
}

/// Storage for a timeline snapshot.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, posts: &[Post], meta: &SnapshotMeta) -> Result<(), SnapshotError>;

    /// The last saved snapshot, or `None` if nothing was saved yet.
    async fn load(&self) -> Result<Option<Snapshot>, SnapshotError>;
}
