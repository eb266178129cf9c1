//! Duet: one timeline across Mastodon and Bluesky
//!
//! Main binary with subcommands:
//! - `timeline`: Merged home timeline, resumed from the local snapshot
//! - `thread`: A post with its ancestors and replies
//! - `profile` / `author`: A user's profile or posts
//! - `like`, `repost`, `bookmark` and their undo forms

use std::sync::Arc;

use clap::{Parser, Subcommand};
use duet_core::{Action, Cursor, InteractionStore, Network, Post, SocialAdapter};
use duet_timeline::{Aggregator, TimelineUpdate};
use miette::Result;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod render;
mod store;

use config::Accounts;
use store::JsonSnapshotStore;

fn parse_network(s: &str) -> Result<Network, String> {
    Network::parse(s).ok_or_else(|| format!("unknown network '{}', expected mastodon or bluesky", s))
}

#[derive(Parser)]
#[command(name = "duet")]
#[command(about = "One timeline across Mastodon and Bluesky", long_about = None)]
struct Cli {
    #[command(flatten)]
    accounts: Accounts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the merged home timeline
    Timeline {
        /// Pages to fetch per network
        #[arg(long, default_value = "1")]
        pages: usize,

        /// Ignore the saved snapshot and start fresh
        #[arg(long)]
        fresh: bool,
    },

    /// Show a post with its ancestors and replies
    Thread {
        /// Global post id, e.g. `bluesky:at://...` or `mastodon:1234`
        post_id: String,
    },

    /// Show a user's profile
    Profile {
        #[arg(value_parser = parse_network)]
        network: Network,
        handle: String,
    },

    /// Show a user's posts
    Author {
        #[arg(value_parser = parse_network)]
        network: Network,
        handle: String,

        /// Cursor printed by a previous call
        #[arg(long)]
        cursor: Option<String>,
    },

    /// Like a post
    Like { post_id: String },
    /// Remove a like
    Unlike { post_id: String },
    /// Repost (boost) a post
    #[command(alias = "boost")]
    Repost { post_id: String },
    /// Remove a repost
    #[command(alias = "unboost")]
    Unrepost { post_id: String },
    /// Bookmark a post
    Bookmark { post_id: String },
    /// Remove a bookmark
    Unbookmark { post_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "duet=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let adapters = cli.accounts.connect().await;
    if adapters.is_empty() {
        return Err(miette::miette!(
            help = "set DUET_MASTODON_URL and DUET_MASTODON_TOKEN, or DUET_BLUESKY_HANDLE and DUET_BLUESKY_APP_PASSWORD",
            "no network account is configured"
        ));
    }

    match cli.command {
        Commands::Timeline { pages, fresh } => {
            let store = JsonSnapshotStore::new(cli.accounts.snapshot_path());
            run_timeline(adapters, &store, pages, fresh).await
        }
        Commands::Thread { post_id } => run_thread(&adapters, &post_id).await,
        Commands::Profile { network, handle } => {
            let adapter = adapter_for(&adapters, network)?;
            let user = adapter
                .fetch_user_profile(&handle)
                .await
                .map_err(|e| miette::miette!("{}", e.user_message()))?;
            println!("{}", render::profile(&user));
            Ok(())
        }
        Commands::Author {
            network,
            handle,
            cursor,
        } => {
            let adapter = adapter_for(&adapters, network)?;
            let cursor = cursor.map(Cursor::new);
            let page = adapter
                .fetch_author_feed(&handle, cursor.as_ref())
                .await
                .map_err(|e| miette::miette!("{}", e.user_message()))?;
            print_posts(&page.posts);
            if let Some(next) = page.next_cursor {
                println!("next cursor: {}", next.as_str());
            }
            Ok(())
        }
        Commands::Like { post_id } => run_action(&adapters, &post_id, Action::Like).await,
        Commands::Unlike { post_id } => run_action(&adapters, &post_id, Action::Unlike).await,
        Commands::Repost { post_id } => run_action(&adapters, &post_id, Action::Repost).await,
        Commands::Unrepost { post_id } => run_action(&adapters, &post_id, Action::Unrepost).await,
        Commands::Bookmark { post_id } => run_action(&adapters, &post_id, Action::Bookmark).await,
        Commands::Unbookmark { post_id } => {
            run_action(&adapters, &post_id, Action::Unbookmark).await
        }
    }
}

fn adapter_for(
    adapters: &[Arc<dyn SocialAdapter>],
    network: Network,
) -> Result<Arc<dyn SocialAdapter>> {
    adapters
        .iter()
        .find(|a| a.network() == network)
        .cloned()
        .ok_or_else(|| miette::miette!("no {} account is configured", network.prefix()))
}

/// Resolve a global post id to its adapter and fetch the post.
async fn load_post(
    adapters: &[Arc<dyn SocialAdapter>],
    post_id: &str,
) -> Result<(Arc<dyn SocialAdapter>, Post)> {
    let (network, native) = Network::split_global_id(post_id)
        .ok_or_else(|| miette::miette!("'{}' is not a post id like mastodon:123", post_id))?;
    let adapter = adapter_for(adapters, network)?;
    let post = adapter
        .fetch_post(native)
        .await
        .map_err(|e| miette::miette!("{}", e.user_message()))?;
    Ok((adapter, post))
}

fn print_posts(posts: &[Post]) {
    for post in posts {
        println!("{}", render::post(post, 0));
    }
}

fn report(update: &TimelineUpdate) {
    for failure in &update.errors {
        eprintln!("warning: {}", failure);
    }
    for network in &update.terminated {
        eprintln!(
            "warning: {} session ended, sign in again to see its posts",
            network.prefix()
        );
    }
}

async fn run_timeline(
    adapters: Vec<Arc<dyn SocialAdapter>>,
    store: &JsonSnapshotStore,
    pages: usize,
    fresh: bool,
) -> Result<()> {
    let aggregator = Aggregator::new(adapters, Arc::new(InteractionStore::new()));

    if !fresh {
        match aggregator.restore_from(store).await {
            Ok(true) => tracing::debug!(path = %store.path().display(), "resumed from snapshot"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "ignoring unreadable snapshot"),
        }
    }

    match aggregator.refresh().await {
        Ok(update) => report(&update),
        // Keep showing whatever the snapshot had.
        Err(e) => eprintln!("warning: {}", e),
    }

    for _ in 1..pages {
        match aggregator.load_more().await {
            Ok(update) => report(&update),
            Err(e) => {
                eprintln!("warning: {}", e);
                break;
            }
        }
    }

    print_posts(&aggregator.posts().await);

    aggregator
        .save_to(store)
        .await
        .map_err(|e| miette::miette!("Failed to save snapshot: {}", e))
}

async fn run_thread(adapters: &[Arc<dyn SocialAdapter>], post_id: &str) -> Result<()> {
    let (adapter, focus) = load_post(adapters, post_id).await?;

    let (ancestors, replies) = tokio::join!(
        adapter.fetch_ancestors(&focus),
        adapter.fetch_thread(&focus)
    );
    let ancestors = ancestors.unwrap_or_else(|e| {
        warn!(error = %e, "could not load ancestors");
        Vec::new()
    });
    let replies = replies.map_err(|e| miette::miette!("{}", e.user_message()))?;

    println!("{}", render::thread(&ancestors, &focus, &replies));
    Ok(())
}

async fn run_action(
    adapters: &[Arc<dyn SocialAdapter>],
    post_id: &str,
    action: Action,
) -> Result<()> {
    let (adapter, post) = load_post(adapters, post_id).await?;
    let interactions = InteractionStore::new();
    let state = interactions
        .perform(adapter.as_ref(), &post, action)
        .await
        .map_err(|e| miette::miette!("{} failed: {}", action, e.user_message()))?;

    println!(
        "{} {}: liked={} reposted={} bookmarked={} likes={} reposts={}",
        action,
        post.id,
        state.is_liked,
        state.is_reposted,
        state.is_bookmarked,
        render::count(state.like_count),
        render::count(state.repost_count),
    );
    Ok(())
}
