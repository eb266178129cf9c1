//! Account configuration and adapter construction.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use duet_atproto::{BlueskyAdapter, BlueskyConfig};
use duet_core::enrich::DEFAULT_QUOTE_BUDGET;
use duet_core::filter::DEFAULT_FOLLOW_CAP;
use duet_core::{Credentials, FeedError, SocialAdapter};
use duet_mastodon::{MastodonAdapter, MastodonConfig, OAuthApp};
use tracing::{info, warn};

use crate::store;

/// Accounts and tunables, from flags or the environment.
///
/// Either network may be left unconfigured.
#[derive(Args, Debug, Clone)]
pub struct Accounts {
    /// Mastodon instance URL
    #[arg(long, env = "DUET_MASTODON_URL")]
    pub mastodon_url: Option<String>,

    /// Mastodon access token
    #[arg(long, env = "DUET_MASTODON_TOKEN", hide_env_values = true)]
    pub mastodon_token: Option<String>,

    /// Mastodon refresh token
    #[arg(long, env = "DUET_MASTODON_REFRESH_TOKEN", hide_env_values = true)]
    pub mastodon_refresh_token: Option<String>,

    /// OAuth client id of the app that issued the Mastodon tokens
    #[arg(long, env = "DUET_MASTODON_CLIENT_ID")]
    pub mastodon_client_id: Option<String>,

    /// OAuth client secret of the app that issued the Mastodon tokens
    #[arg(long, env = "DUET_MASTODON_CLIENT_SECRET", hide_env_values = true)]
    pub mastodon_client_secret: Option<String>,

    /// Bluesky PDS URL
    #[arg(
        long,
        env = "DUET_BLUESKY_PDS_URL",
        default_value = "https://bsky.social"
    )]
    pub bluesky_pds_url: String,

    /// Bluesky handle
    #[arg(long, env = "DUET_BLUESKY_HANDLE")]
    pub bluesky_handle: Option<String>,

    /// Bluesky app password
    #[arg(long, env = "DUET_BLUESKY_APP_PASSWORD", hide_env_values = true)]
    pub bluesky_app_password: Option<String>,

    /// Where the timeline snapshot is kept
    #[arg(long, env = "DUET_SNAPSHOT_PATH")]
    pub snapshot_path: Option<PathBuf>,

    /// Maximum follows collected for reply filtering
    #[arg(long, default_value_t = DEFAULT_FOLLOW_CAP)]
    pub follow_cap: usize,

    /// Linked posts resolved as quotes per page
    #[arg(long, default_value_t = DEFAULT_QUOTE_BUDGET)]
    pub quote_budget: usize,
}

impl Accounts {
    pub fn snapshot_path(&self) -> PathBuf {
        self.snapshot_path.clone().unwrap_or_else(store::default_path)
    }

    pub fn mastodon_config(&self) -> MastodonConfig {
        let app = match (&self.mastodon_client_id, &self.mastodon_client_secret) {
            (Some(client_id), Some(client_secret)) => Some(OAuthApp {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
            }),
            _ => None,
        };
        MastodonConfig {
            follow_cap: self.follow_cap,
            quote_budget: self.quote_budget,
            app,
            ..MastodonConfig::default()
        }
    }

    pub fn bluesky_config(&self) -> BlueskyConfig {
        BlueskyConfig {
            follow_cap: self.follow_cap,
            quote_budget: self.quote_budget,
            ..BlueskyConfig::default()
        }
    }

    pub fn mastodon_credentials(&self) -> Option<Credentials> {
        let url = self.mastodon_url.as_deref()?;
        let token = self.mastodon_token.as_deref()?;
        let credentials = Credentials::new(url, token);
        Some(match &self.mastodon_refresh_token {
            Some(refresh) => credentials.with_refresh_token(refresh.clone()),
            None => credentials,
        })
    }

    /// Build an adapter for every configured network.
    ///
    /// A network that fails to sign in is skipped with a warning.
    pub async fn connect(&self) -> Vec<Arc<dyn SocialAdapter>> {
        let mut adapters: Vec<Arc<dyn SocialAdapter>> = Vec::new();

        if let Some(credentials) = self.mastodon_credentials() {
            match MastodonAdapter::from_credentials(&credentials, self.mastodon_config()) {
                Ok(adapter) => {
                    info!(instance = %credentials.host(), "mastodon account configured");
                    adapters.push(Arc::new(adapter));
                }
                Err(e) => warn!(error = %e, "skipping mastodon account"),
            }
        }

        if let (Some(handle), Some(password)) = (&self.bluesky_handle, &self.bluesky_app_password) {
            match self.bluesky_login(handle, password).await {
                Ok(adapter) => adapters.push(Arc::new(adapter)),
                Err(e) => warn!(error = %e, "skipping bluesky account"),
            }
        }

        adapters
    }

    async fn bluesky_login(&self, handle: &str, password: &str) -> Result<BlueskyAdapter, FeedError> {
        BlueskyAdapter::login(&self.bluesky_pds_url, handle, password, self.bluesky_config()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        accounts: Accounts,
    }

    fn parse(args: &[&str]) -> Accounts {
        let mut argv = vec!["duet"];
        argv.extend_from_slice(args);
        TestCli::parse_from(argv).accounts
    }

    #[test]
    fn test_mastodon_requires_url_and_token() {
        let accounts = parse(&["--mastodon-url", "https://social.example/"]);
        if accounts.mastodon_token.is_none() {
            assert!(accounts.mastodon_credentials().is_none());
        }

        let accounts = parse(&[
            "--mastodon-url",
            "https://social.example/",
            "--mastodon-token",
            "t",
            "--mastodon-refresh-token",
            "r",
        ]);
        let credentials = accounts.mastodon_credentials().unwrap();
        assert_eq!(credentials.base_url, "https://social.example");
        assert_eq!(credentials.refresh_token.as_deref(), Some("r"));
    }

    #[test]
    fn test_oauth_app_needs_both_halves() {
        let accounts = parse(&["--mastodon-client-id", "id"]);
        if accounts.mastodon_client_secret.is_none() {
            assert!(accounts.mastodon_config().app.is_none());
        }

        let accounts = parse(&[
            "--mastodon-client-id",
            "id",
            "--mastodon-client-secret",
            "secret",
        ]);
        assert_eq!(accounts.mastodon_config().app.unwrap().client_id, "id");
    }

    #[test]
    fn test_tunables_reach_adapter_configs() {
        let accounts = parse(&["--quote-budget", "2", "--follow-cap", "100"]);
        let mastodon = accounts.mastodon_config();
        let bluesky = accounts.bluesky_config();

        assert_eq!(mastodon.quote_budget, 2);
        assert_eq!(mastodon.follow_cap, 100);
        assert_eq!(mastodon.page_size, 40);
        assert_eq!(bluesky.quote_budget, 2);
        assert_eq!(bluesky.page_size, 50);
    }

    #[test]
    fn test_snapshot_path_override() {
        let accounts = parse(&["--snapshot-path", "/tmp/duet-test.json"]);
        assert_eq!(accounts.snapshot_path(), PathBuf::from("/tmp/duet-test.json"));
    }
}
