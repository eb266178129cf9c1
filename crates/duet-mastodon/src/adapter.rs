//! [`SocialAdapter`] over the Mastodon REST API.

use async_trait::async_trait;
use duet_core::filter::{
    DEFAULT_FOLLOW_CAP, FollowSet, collect_follow_set, needs_follow_set, retain_home_items,
};
use duet_core::thread::{collect_ancestors, flatten_replies};
use duet_core::{
    Credentials, Cursor, FeedError, Network, Page, Post, QuoteBudget, QuotedPost, SocialAdapter,
    ThreadItem, UnifiedUser, enrich::DEFAULT_QUOTE_BUDGET,
};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::normalize::{self, StatusLink, quote_link};
use crate::{
    Account, Context, MastodonClient, MastodonError, OAuthApp, Relationship, SearchResults, Status,
};

/// Page size for the following list; the API maximum.
const FOLLOWING_PAGE_SIZE: u32 = 80;

/// Tunables for the Mastodon adapter.
#[derive(Debug, Clone)]
pub struct MastodonConfig {
    pub page_size: u32,
    pub follow_cap: usize,
    pub quote_budget: usize,
    /// OAuth application used to refresh tokens.
    pub app: Option<OAuthApp>,
}

impl Default for MastodonConfig {
    fn default() -> Self {
        Self {
            page_size: 40,
            follow_cap: DEFAULT_FOLLOW_CAP,
            quote_budget: DEFAULT_QUOTE_BUDGET,
            app: None,
        }
    }
}

/// Adapter for a Mastodon account.
pub struct MastodonAdapter {
    client: MastodonClient,
    instance: String,
    config: MastodonConfig,
    viewer: RwLock<Option<String>>,
}

impl MastodonAdapter {
    pub fn new(client: MastodonClient, config: MastodonConfig) -> Self {
        let instance = Credentials::new(client.base_url(), "").host().to_string();
        Self {
            client,
            instance,
            config,
            viewer: RwLock::new(None),
        }
    }

    /// Build an adapter from an issued access token.
    ///
    /// The viewer's account id is taken from the credentials when present and
    /// looked up lazily otherwise.
    pub fn from_credentials(
        credentials: &Credentials,
        config: MastodonConfig,
    ) -> Result<Self, FeedError> {
        let client = MastodonClient::new(&credentials.base_url, &credentials.access_token)?
            .with_refresh(credentials.refresh_token.clone(), config.app.clone());
        let mut adapter = Self::new(client, config);
        adapter.viewer = RwLock::new(credentials.actor_id.clone());
        Ok(adapter)
    }

    pub fn client(&self) -> &MastodonClient {
        &self.client
    }

    /// Page through an account's following list, bounded by the configured
    /// cap.
    async fn follow_set(&self, account_id: &str) -> Result<FollowSet, MastodonError> {
        let path = format!("/api/v1/accounts/{account_id}/following");
        let path = path.as_str();
        collect_follow_set(self.config.follow_cap, |cursor| async move {
            let mut params = vec![("limit", FOLLOWING_PAGE_SIZE.to_string())];
            if let Some(max_id) = cursor {
                params.push(("max_id", max_id));
            }
            let (accounts, next): (Vec<Value>, _) = self.client.get_page(path, &params).await?;
            let ids: Vec<String> = accounts
                .iter()
                .filter_map(|a| a.get("id").and_then(Value::as_str).map(str::to_string))
                .collect();
            Ok::<_, MastodonError>((ids, next))
        })
        .await
    }

    async fn statuses_page(
        &self,
        path: &str,
        cursor: Option<&Cursor>,
    ) -> Result<(Vec<Value>, Option<Cursor>), FeedError> {
        let mut params = vec![("limit", self.config.page_size.to_string())];
        if let Some(cursor) = cursor {
            params.push(("max_id", cursor.as_str().to_string()));
        }
        let raw: Vec<Value> = self.client.get(path, &params).await?;
        // The next page starts below the last status returned, whether or not
        // it survives filtering.
        let next = raw
            .last()
            .and_then(|s| s.get("id"))
            .and_then(Value::as_str)
            .map(Cursor::new);
        Ok((raw, next))
    }

    async fn context(&self, native_id: &str) -> Result<Context, FeedError> {
        Ok(self
            .client
            .get(&format!("/api/v1/statuses/{native_id}/context"), &[])
            .await?)
    }

    async fn lookup_account(&self, handle: &str) -> Result<Account, FeedError> {
        let acct = handle.trim().trim_start_matches('@');
        let local = acct
            .strip_suffix(&format!("@{}", self.instance))
            .unwrap_or(acct);
        match self
            .client
            .get::<Account>("/api/v1/accounts/lookup", &[("acct", local.to_string())])
            .await
        {
            Ok(account) => Ok(account),
            Err(MastodonError::Status { status: 404, .. }) => {
                debug!(acct, "account not known locally, resolving");
                let results: SearchResults = self
                    .client
                    .get(
                        "/api/v2/search",
                        &[
                            ("q", format!("@{acct}")),
                            ("type", "accounts".to_string()),
                            ("resolve", "true".to_string()),
                            ("limit", "1".to_string()),
                        ],
                    )
                    .await?;
                results
                    .accounts
                    .first()
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .ok_or_else(|| FeedError::from_status(404, format!("account not found: {acct}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn relationship(&self, account_id: &str) -> Option<Relationship> {
        let result: Result<Vec<Relationship>, _> = self
            .client
            .get(
                "/api/v1/accounts/relationships",
                &[("id[]", account_id.to_string())],
            )
            .await;
        match result {
            Ok(relationships) => relationships.into_iter().find(|r| r.id == account_id),
            Err(e) => {
                debug!(account_id, error = %e, "relationship lookup failed");
                None
            }
        }
    }

    async fn resolve_status(&self, link: &StatusLink) -> Result<Post, FeedError> {
        if link.host == self.instance {
            return self.fetch_post(&link.id).await;
        }
        let results: SearchResults = self
            .client
            .get(
                "/api/v2/search",
                &[
                    ("q", link.url.clone()),
                    ("type", "statuses".to_string()),
                    ("resolve", "true".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        results
            .statuses
            .iter()
            .find_map(|v| normalize::post_from_value(v, &self.instance))
            .ok_or_else(|| FeedError::from_status(404, format!("status not found: {}", link.url)))
    }

    /// Attach quoted statuses linked by URL, spending the page budget.
    async fn enrich_quotes(&self, posts: &mut [Post]) {
        let mut budget = QuoteBudget::new(self.config.quote_budget);
        for post in posts.iter_mut().filter(|p| p.quote.is_none()) {
            let Some(link) = quote_link(post) else {
                continue;
            };
            if !budget.try_spend() {
                break;
            }
            match self.resolve_status(&link).await {
                Ok(quoted) if quoted.id != post.id => {
                    post.quote = Some(QuotedPost::from(&quoted));
                }
                Ok(_) => {}
                Err(e) => debug!(post = %post.id, error = %e, "quote lookup failed"),
            }
        }
    }

    async fn status_action(&self, post: &Post, action: &str) -> Result<(), FeedError> {
        if !self.owns(post) {
            return Ok(());
        }
        let _: Status = self
            .client
            .post(&format!("/api/v1/statuses/{}/{action}", post.native_id))
            .await?;
        debug!(post = %post.id, action, "applied status action");
        Ok(())
    }

    async fn account_action(&self, user: &UnifiedUser, action: &str) -> Result<(), FeedError> {
        if user.network != Network::Mastodon {
            return Ok(());
        }
        let _: Relationship = self
            .client
            .post(&format!("/api/v1/accounts/{}/{action}", user.native_id))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SocialAdapter for MastodonAdapter {
    fn network(&self) -> Network {
        Network::Mastodon
    }

    async fn viewer_id(&self) -> Option<String> {
        if let Some(id) = self.viewer.read().await.clone() {
            return Some(id);
        }
        match self.client.verify_credentials().await {
            Ok(account) => {
                *self.viewer.write().await = Some(account.id.clone());
                Some(account.id)
            }
            Err(e) => {
                warn!(error = %e, "failed to verify mastodon credentials");
                None
            }
        }
    }

    async fn fetch_home_timeline(&self, cursor: Option<&Cursor>) -> Result<Page, FeedError> {
        let (raw, next_cursor) = self
            .statuses_page("/api/v1/timelines/home", cursor)
            .await?;
        let viewer = self.viewer_id().await;

        let items: Vec<_> = raw
            .iter()
            .filter_map(|v| normalize::timeline_item(v, &self.instance))
            .collect();
        let skipped = raw.len() - items.len();

        let follows = if needs_follow_set(items.iter().map(|(_, c)| c), viewer.as_deref()) {
            match viewer.as_deref() {
                Some(id) => match self.follow_set(id).await {
                    Ok(set) => Some(set),
                    Err(e) => {
                        warn!(error = %e, "failed to build follow set, excluding unresolved replies");
                        None
                    }
                },
                None => None,
            }
        } else {
            None
        };

        let mut posts = retain_home_items(items, viewer.as_deref(), follows.as_ref());
        self.enrich_quotes(&mut posts).await;

        debug!(
            count = posts.len(),
            skipped,
            has_more = next_cursor.is_some(),
            "fetched mastodon timeline page"
        );
        Ok(Page { posts, next_cursor })
    }

    async fn fetch_thread(&self, root: &Post) -> Result<Vec<ThreadItem>, FeedError> {
        let context = self.context(&root.native_id).await?;
        let nodes = normalize::reply_nodes(&context.descendants, &self.instance);
        Ok(flatten_replies(&root.native_id, nodes))
    }

    async fn fetch_ancestors(&self, post: &Post) -> Result<Vec<Post>, FeedError> {
        let Some(parent) = post
            .reply_parent_id
            .as_deref()
            .and_then(Network::split_global_id)
            .map(|(_, native)| native.to_string())
        else {
            return Ok(Vec::new());
        };
        let context = self.context(&post.native_id).await?;
        Ok(collect_ancestors(normalize::ancestor_chain(
            Some(parent),
            &context.ancestors,
            &self.instance,
        )))
    }

    async fn fetch_post(&self, native_id: &str) -> Result<Post, FeedError> {
        let status: Status = self
            .client
            .get(&format!("/api/v1/statuses/{native_id}"), &[])
            .await?;
        Ok(normalize::post_from_status(&status, &self.instance))
    }

    async fn fetch_user_profile(&self, handle: &str) -> Result<UnifiedUser, FeedError> {
        let account = self.lookup_account(handle).await?;
        let relationship = self.relationship(&account.id).await;
        Ok(normalize::profile(
            &account,
            relationship.as_ref(),
            &self.instance,
        ))
    }

    async fn fetch_author_feed(
        &self,
        handle: &str,
        cursor: Option<&Cursor>,
    ) -> Result<Page, FeedError> {
        let account = self.lookup_account(handle).await?;
        let (raw, next_cursor) = self
            .statuses_page(&format!("/api/v1/accounts/{}/statuses", account.id), cursor)
            .await?;
        let mut posts = normalize::statuses(&raw, &self.instance);
        self.enrich_quotes(&mut posts).await;
        Ok(Page { posts, next_cursor })
    }

    async fn like(&self, post: &Post) -> Result<Option<String>, FeedError> {
        self.status_action(post, "favourite").await?;
        Ok(None)
    }

    async fn unlike(&self, post: &Post, _undo: Option<&str>) -> Result<Option<String>, FeedError> {
        self.status_action(post, "unfavourite").await?;
        Ok(None)
    }

    async fn repost(&self, post: &Post) -> Result<Option<String>, FeedError> {
        self.status_action(post, "reblog").await?;
        Ok(None)
    }

    async fn unrepost(
        &self,
        post: &Post,
        _undo: Option<&str>,
    ) -> Result<Option<String>, FeedError> {
        self.status_action(post, "unreblog").await?;
        Ok(None)
    }

    async fn bookmark(&self, post: &Post) -> Result<Option<String>, FeedError> {
        self.status_action(post, "bookmark").await?;
        Ok(None)
    }

    async fn unbookmark(&self, post: &Post) -> Result<Option<String>, FeedError> {
        self.status_action(post, "unbookmark").await?;
        Ok(None)
    }

    async fn follow_user(&self, user: &UnifiedUser) -> Result<Option<String>, FeedError> {
        self.account_action(user, "follow").await?;
        Ok(None)
    }

    async fn unfollow_user(&self, user: &UnifiedUser) -> Result<(), FeedError> {
        self.account_action(user, "unfollow").await
    }

    async fn refresh_credentials(&self) -> Result<(), FeedError> {
        self.client.refresh_token().await?;
        info!(instance = %self.instance, "refreshed mastodon access token");
        Ok(())
    }
}
