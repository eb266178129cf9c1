//! AT Protocol adapter for Duet.
//!
//! This crate talks to a PDS over XRPC and maps `app.bsky` feed, thread and
//! profile views onto the canonical model in `duet-core`.
//!
//! ## Features
//!
//! - **HTTP Client**: session management and record create/delete
//! - **Normalizer**: pure mapping of post, feed and profile views
//! - **Adapter**: [`BlueskyAdapter`], the `SocialAdapter` implementation

mod adapter;
mod client;
mod error;
pub mod normalize;
mod records;
mod types;
mod uri;

pub use adapter::{BlueskyAdapter, BlueskyConfig};
pub use client::AtprotoClient;
pub use error::AtprotoError;
pub use records::*;
pub use types::*;
pub use uri::{AtUri, AtUriError, Permalink};
