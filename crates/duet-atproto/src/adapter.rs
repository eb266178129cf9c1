//! [`SocialAdapter`] over the `app.bsky` XRPC API.

use async_trait::async_trait;
use duet_core::filter::{
    DEFAULT_FOLLOW_CAP, FollowSet, collect_follow_set, needs_follow_set, retain_home_items,
};
use duet_core::thread::{MAX_ANCESTORS, collect_ancestors, flatten_replies};
use duet_core::{
    Credentials, Cursor, FeedError, Network, Page, Post, QuoteBudget, QuotedPost, SocialAdapter,
    ThreadItem, UnifiedUser, enrich::DEFAULT_QUOTE_BUDGET,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::normalize::{self, quote_permalink};
use crate::{
    AtUri, AtprotoClient, AtprotoError, FOLLOW_COLLECTION, FeedResponse, FollowRecord,
    FollowsResponse, LIKE_COLLECTION, PostsResponse, ProfileViewDetailed, REPOST_COLLECTION,
    ResolveHandleResponse, SubjectRecord, ThreadResponse,
};

/// Page size for `getFollows`; the lexicon maximum.
const FOLLOWS_PAGE_SIZE: u32 = 100;

/// Tunables for the AT Protocol adapter.
#[derive(Debug, Clone)]
pub struct BlueskyConfig {
    pub page_size: u32,
    pub follow_cap: usize,
    pub quote_budget: usize,
}

impl Default for BlueskyConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            follow_cap: DEFAULT_FOLLOW_CAP,
            quote_budget: DEFAULT_QUOTE_BUDGET,
        }
    }
}

/// Adapter for an AT Protocol account.
pub struct BlueskyAdapter {
    client: AtprotoClient,
    instance: String,
    config: BlueskyConfig,
}

impl BlueskyAdapter {
    pub fn new(client: AtprotoClient, config: BlueskyConfig) -> Self {
        let instance = Credentials::new(client.pds_url(), "").host().to_string();
        Self {
            client,
            instance,
            config,
        }
    }

    /// Build an adapter from tokens issued elsewhere.
    pub async fn from_credentials(
        credentials: &Credentials,
        config: BlueskyConfig,
    ) -> Result<Self, FeedError> {
        let client = AtprotoClient::new(&credentials.base_url)?;
        client
            .resume(
                credentials.access_token.clone(),
                credentials.refresh_token.clone(),
                credentials.actor_id.clone(),
            )
            .await?;
        Ok(Self::new(client, config))
    }

    /// Log in with an identifier and app password.
    pub async fn login(
        pds_url: &str,
        identifier: &str,
        password: &str,
        config: BlueskyConfig,
    ) -> Result<Self, FeedError> {
        let client = AtprotoClient::new(pds_url)?;
        client.login(identifier, password).await?;
        info!(identifier, "signed in to AT Protocol PDS");
        Ok(Self::new(client, config))
    }

    pub fn client(&self) -> &AtprotoClient {
        &self.client
    }

    async fn did(&self) -> Result<String, FeedError> {
        self.client
            .did()
            .await
            .ok_or(FeedError::AuthExpired { status: 401 })
    }

    /// Page through the viewer's follows, bounded by the configured cap.
    async fn follow_set(&self, did: &str) -> Result<FollowSet, AtprotoError> {
        collect_follow_set(self.config.follow_cap, |cursor| async move {
            let mut params = vec![
                ("actor", did.to_string()),
                ("limit", FOLLOWS_PAGE_SIZE.to_string()),
            ];
            if let Some(cursor) = cursor {
                params.push(("cursor", cursor));
            }
            let page: FollowsResponse = self
                .client
                .query("app.bsky.graph.getFollows", &params)
                .await?;
            let ids: Vec<String> = page
                .follows
                .iter()
                .filter_map(|f| f.get("did").and_then(Value::as_str).map(str::to_string))
                .collect();
            Ok::<_, AtprotoError>((ids, page.cursor))
        })
        .await
    }

    async fn resolve_did(&self, actor: &str) -> Result<String, FeedError> {
        if actor.starts_with("did:") {
            return Ok(actor.to_string());
        }
        let resolved: ResolveHandleResponse = self
            .client
            .query(
                "com.atproto.identity.resolveHandle",
                &[("handle", actor.to_string())],
            )
            .await?;
        Ok(resolved.did)
    }

    /// Attach quoted posts linked by permalink, spending the page budget.
    async fn enrich_quotes(&self, posts: &mut [Post]) {
        let mut budget = QuoteBudget::new(self.config.quote_budget);
        for post in posts.iter_mut().filter(|p| p.quote.is_none()) {
            let Some(link) = quote_permalink(post) else {
                continue;
            };
            if !budget.try_spend() {
                break;
            }
            let quoted = async {
                let did = self.resolve_did(&link.actor).await?;
                self.fetch_post(&AtUri::post(did, &link.rkey).to_string())
                    .await
            }
            .await;
            match quoted {
                Ok(quoted) if quoted.id != post.id => {
                    post.quote = Some(QuotedPost::from(&quoted));
                }
                Ok(_) => {}
                Err(e) => debug!(post = %post.id, error = %e, "quote lookup failed"),
            }
        }
    }

    async fn feed_page(
        &self,
        nsid: &str,
        mut params: Vec<(&str, String)>,
        cursor: Option<&Cursor>,
    ) -> Result<FeedResponse, FeedError> {
        params.push(("limit", self.config.page_size.to_string()));
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.as_str().to_string()));
        }
        Ok(self.client.query(nsid, &params).await?)
    }

    async fn thread(
        &self,
        uri: &str,
        depth: usize,
        parent_height: usize,
    ) -> Result<Value, FeedError> {
        let response: ThreadResponse = self
            .client
            .query(
                "app.bsky.feed.getPostThread",
                &[
                    ("uri", uri.to_string()),
                    ("depth", depth.to_string()),
                    ("parentHeight", parent_height.to_string()),
                ],
            )
            .await?;
        Ok(response.thread)
    }

    /// The post's undo token, re-reading viewer state when none was cached.
    async fn viewer_record(
        &self,
        post: &Post,
        undo: Option<&str>,
        pick: fn(&Post) -> Option<String>,
    ) -> Result<Option<String>, FeedError> {
        if let Some(undo) = undo {
            return Ok(Some(undo.to_string()));
        }
        let fresh = self.fetch_post(&post.native_id).await?;
        Ok(pick(&fresh))
    }

    async fn subject(&self, post: &Post) -> Result<SubjectRecord, FeedError> {
        let cid = match &post.native_cid {
            Some(cid) => cid.clone(),
            None => self
                .fetch_post(&post.native_id)
                .await?
                .native_cid
                .ok_or_else(|| FeedError::Decoding("post has no cid".to_string()))?,
        };
        Ok(SubjectRecord::new(&post.native_id, cid))
    }
}

#[async_trait]
impl SocialAdapter for BlueskyAdapter {
    fn network(&self) -> Network {
        Network::Bluesky
    }

    async fn viewer_id(&self) -> Option<String> {
        self.client.did().await
    }

    async fn fetch_home_timeline(&self, cursor: Option<&Cursor>) -> Result<Page, FeedError> {
        let response = self
            .feed_page("app.bsky.feed.getTimeline", Vec::new(), cursor)
            .await?;
        let viewer = self.client.did().await;

        let items: Vec<_> = response
            .feed
            .iter()
            .filter_map(|v| normalize::feed_item(v, &self.instance))
            .collect();
        let skipped = response.feed.len() - items.len();

        let follows = if needs_follow_set(items.iter().map(|(_, c)| c), viewer.as_deref()) {
            match viewer.as_deref() {
                Some(did) => match self.follow_set(did).await {
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
            has_more = response.cursor.is_some(),
            "fetched bluesky timeline page"
        );
        Ok(Page {
            posts,
            next_cursor: response.cursor.map(Cursor::new),
        })
    }

    async fn fetch_thread(&self, root: &Post) -> Result<Vec<ThreadItem>, FeedError> {
        let thread = self.thread(&root.native_id, 1000, 0).await?;
        let Some((root_uri, nodes)) = normalize::thread_replies(&thread, &self.instance) else {
            return Err(FeedError::Decoding("thread has no root post".to_string()));
        };
        Ok(flatten_replies(&root_uri, nodes))
    }

    async fn fetch_ancestors(&self, post: &Post) -> Result<Vec<Post>, FeedError> {
        let thread = self.thread(&post.native_id, 0, MAX_ANCESTORS).await?;
        Ok(collect_ancestors(normalize::ancestor_chain(
            &thread,
            &self.instance,
        )))
    }

    async fn fetch_post(&self, native_id: &str) -> Result<Post, FeedError> {
        let response: PostsResponse = self
            .client
            .query("app.bsky.feed.getPosts", &[("uris", native_id.to_string())])
            .await?;
        response
            .posts
            .iter()
            .find_map(|v| normalize::post_from_value(v, &self.instance))
            .ok_or_else(|| FeedError::from_status(404, format!("post not found: {native_id}")))
    }

    async fn fetch_user_profile(&self, handle: &str) -> Result<UnifiedUser, FeedError> {
        let actor = handle.trim().trim_start_matches('@');
        let view: ProfileViewDetailed = self
            .client
            .query("app.bsky.actor.getProfile", &[("actor", actor.to_string())])
            .await?;
        Ok(normalize::profile(view))
    }

    async fn fetch_author_feed(
        &self,
        handle: &str,
        cursor: Option<&Cursor>,
    ) -> Result<Page, FeedError> {
        let actor = handle.trim().trim_start_matches('@').to_string();
        let response = self
            .feed_page("app.bsky.feed.getAuthorFeed", vec![("actor", actor)], cursor)
            .await?;
        let mut posts = normalize::feed_posts(&response.feed, &self.instance);
        self.enrich_quotes(&mut posts).await;
        Ok(Page {
            posts,
            next_cursor: response.cursor.map(Cursor::new),
        })
    }

    async fn like(&self, post: &Post) -> Result<Option<String>, FeedError> {
        if !self.owns(post) {
            return Ok(None);
        }
        let record = self.subject(post).await?;
        let created = self.client.create_record(LIKE_COLLECTION, &record).await?;
        Ok(Some(AtUri::extract_rkey(&created.uri).to_string()))
    }

    async fn unlike(&self, post: &Post, undo: Option<&str>) -> Result<Option<String>, FeedError> {
        if !self.owns(post) {
            return Ok(None);
        }
        let Some(rkey) = self.viewer_record(post, undo, |p| p.undo.like.clone()).await? else {
            debug!(post = %post.id, "no like record to delete");
            return Ok(None);
        };
        self.client.delete_record(LIKE_COLLECTION, &rkey).await?;
        Ok(None)
    }

    async fn repost(&self, post: &Post) -> Result<Option<String>, FeedError> {
        if !self.owns(post) {
            return Ok(None);
        }
        let record = self.subject(post).await?;
        let created = self
            .client
            .create_record(REPOST_COLLECTION, &record)
            .await?;
        Ok(Some(AtUri::extract_rkey(&created.uri).to_string()))
    }

    async fn unrepost(
        &self,
        post: &Post,
        undo: Option<&str>,
    ) -> Result<Option<String>, FeedError> {
        if !self.owns(post) {
            return Ok(None);
        }
        let Some(rkey) = self
            .viewer_record(post, undo, |p| p.undo.repost.clone())
            .await?
        else {
            debug!(post = %post.id, "no repost record to delete");
            return Ok(None);
        };
        self.client.delete_record(REPOST_COLLECTION, &rkey).await?;
        Ok(None)
    }

    async fn follow_user(&self, user: &UnifiedUser) -> Result<Option<String>, FeedError> {
        if user.network != Network::Bluesky {
            return Ok(None);
        }
        let created = self
            .client
            .create_record(FOLLOW_COLLECTION, &FollowRecord::new(&user.native_id))
            .await?;
        Ok(Some(AtUri::extract_rkey(&created.uri).to_string()))
    }

    async fn unfollow_user(&self, user: &UnifiedUser) -> Result<(), FeedError> {
        if user.network != Network::Bluesky {
            return Ok(());
        }
        let token = match &user.follow_token {
            Some(token) => Some(token.clone()),
            None => self.fetch_user_profile(&user.native_id).await?.follow_token,
        };
        if let Some(rkey) = token {
            self.client.delete_record(FOLLOW_COLLECTION, &rkey).await?;
        }
        Ok(())
    }

    async fn refresh_credentials(&self) -> Result<(), FeedError> {
        self.client.refresh_session().await?;
        let did = self.did().await?;
        info!(did = %did, "refreshed AT Protocol session");
        Ok(())
    }
}
