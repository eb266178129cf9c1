//! Network-agnostic core of Duet.
//!
//! This crate holds everything the aggregation engine shares between the
//! per-network adapters:
//!
//! - **Model**: the canonical [`Post`], [`ThreadItem`] and [`UnifiedUser`] types
//! - **Adapter**: the [`SocialAdapter`] capability trait each network implements
//! - **Rich text**: byte-offset facet and HTML span mapping
//! - **Filter**: the follow-graph reply filter and bounded [`FollowSet`]
//! - **Thread**: ancestor walks and depth-tagged descendant flattening
//! - **Interaction**: the keyed store of like/repost/bookmark state
//! - **Enrich**: the per-page quote lookup budget

pub mod adapter;
pub mod enrich;
mod error;
pub mod filter;
pub mod interaction;
mod model;
pub mod richtext;
pub mod thread;

pub use adapter::{Action, Credentials, SocialAdapter};
pub use enrich::QuoteBudget;
pub use error::FeedError;
pub use filter::{FollowSet, ReplyCandidate, collect_follow_set};
pub use interaction::{InteractionState, InteractionStore};
pub use model::*;
pub use richtext::{SpanKind, StyledText, TextSpan};
pub use thread::{AncestorNode, ReplyNode};
