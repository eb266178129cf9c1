//! Error types for timeline aggregation.

use std::fmt;

use duet_core::{FeedError, Network};
use thiserror::Error;

/// One network's failure during an aggregate fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkFailure {
    pub network: Network,
    pub error: FeedError,
}

impl fmt::Display for NetworkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.network, self.error)
    }
}

/// Errors surfaced by the aggregator.
#[derive(Debug, Error)]
pub enum TimelineError {
    /// Every network that was asked failed.
    #[error("all networks failed: {}", join(.0))]
    AllNetworksFailed(Vec<NetworkFailure>),

    /// Snapshot persistence failed.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

fn join(failures: &[NetworkFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from a [`SnapshotStore`](crate::SnapshotStore).
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
