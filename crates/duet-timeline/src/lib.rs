//! Timeline aggregation for Duet.
//!
//! [`Aggregator`] fans out to every configured [`SocialAdapter`], keeps a
//! cursor and page list per network, and merges them into one deduplicated
//! feed sorted newest first.
//!
//! [`SocialAdapter`]: duet_core::SocialAdapter

mod aggregator;
mod error;
pub mod merge;
mod snapshot;

pub use aggregator::{Aggregator, DEFAULT_LOAD_MORE_THRESHOLD, TimelineUpdate};
pub use error::{NetworkFailure, SnapshotError, TimelineError};
pub use merge::merge;
pub use snapshot::{Snapshot, SnapshotMeta, SnapshotStore};
