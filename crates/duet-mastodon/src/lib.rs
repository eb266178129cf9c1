//! Mastodon adapter for Duet.
//!
//! Wraps the instance's REST API and maps statuses, accounts and thread
//! contexts onto the canonical model in `duet-core`.

mod adapter;
mod client;
mod error;
pub mod normalize;
mod types;

pub use adapter::{MastodonAdapter, MastodonConfig};
pub use client::{MastodonClient, OAuthApp};
pub use error::MastodonError;
pub use types::*;
