//! REST client for a Mastodon-compatible instance.
//!
//! Every method issues exactly one request. Rejected tokens surface as
//! errors; refreshing and retrying is the caller's decision.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{Account, MastodonError, TokenResponse};

static LINK_NEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<([^>]+)>\s*;\s*rel="?next"?"#).expect("valid regex"));

static MAX_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]max_id=([^&#]+)").expect("valid regex"));

/// Registered OAuth application, needed to refresh tokens.
#[derive(Clone)]
pub struct OAuthApp {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for OAuthApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthApp")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

struct Tokens {
    access: String,
    refresh: Option<String>,
}

/// Client for the Mastodon REST API.
pub struct MastodonClient {
    http: Client,
    base_url: String,
    tokens: RwLock<Tokens>,
    app: Option<OAuthApp>,
}

impl MastodonClient {
    /// Create a client for the given instance URL and access token.
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, MastodonError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens: RwLock::new(Tokens {
                access: access_token.into(),
                refresh: None,
            }),
            app: None,
        })
    }

    /// Enable token refresh with a refresh token and the app that issued it.
    pub fn with_refresh(mut self, refresh_token: Option<String>, app: Option<OAuthApp>) -> Self {
        self.tokens.get_mut().refresh = refresh_token.filter(|t| !t.is_empty());
        self.app = app;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn access_token(&self) -> String {
        self.tokens.read().await.access.clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Authenticated GET.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, MastodonError> {
        Ok(self.get_page(path, params).await?.0)
    }

    /// Authenticated GET that also returns the `max_id` of the `rel="next"`
    /// link, if the response has one.
    pub async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<(T, Option<String>), MastodonError> {
        let token = self.access_token().await;
        debug!(path, "mastodon GET");

        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(token)
            .query(params)
            .send()
            .await?;

        let response = Self::check_status(response).await?;
        let next = response
            .headers()
            .get(reqwest::header::LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(next_max_id);
        let body = response.json().await?;
        Ok((body, next))
    }

    /// Authenticated POST without a body.
    pub async fn post<T: DeserializeOwned>(&self, path: &str) -> Result<T, MastodonError> {
        let token = self.access_token().await;
        debug!(path, "mastodon POST");

        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(token)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// The account the access token belongs to.
    pub async fn verify_credentials(&self) -> Result<Account, MastodonError> {
        self.get("/api/v1/accounts/verify_credentials", &[]).await
    }

    /// Exchange the refresh token for a new access token.
    pub async fn refresh_token(&self) -> Result<(), MastodonError> {
        #[derive(Serialize)]
        struct RefreshRequest<'a> {
            grant_type: &'a str,
            refresh_token: &'a str,
            client_id: &'a str,
            client_secret: &'a str,
        }

        let app = self
            .app
            .as_ref()
            .ok_or_else(|| MastodonError::Auth("no OAuth app configured".to_string()))?;
        let refresh = self
            .tokens
            .read()
            .await
            .refresh
            .clone()
            .ok_or_else(|| MastodonError::Auth("no refresh token".to_string()))?;

        let response = self
            .http
            .post(self.url("/oauth/token"))
            .form(&RefreshRequest {
                grant_type: "refresh_token",
                refresh_token: &refresh,
                client_id: &app.client_id,
                client_secret: &app.client_secret,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(MastodonError::Auth(format!("refresh failed ({status}): {text}")));
        }

        let issued: TokenResponse = response.json().await?;
        debug!("refreshed mastodon access token");

        let mut tokens = self.tokens.write().await;
        tokens.access = issued.access_token;
        if let Some(refresh) = issued.refresh_token {
            tokens.refresh = Some(refresh);
        }
        Ok(())
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, MastodonError> {
        let response = Self::check_status(response).await?;
        let body = response.json().await?;
        Ok(body)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, MastodonError> {
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let reset = response
                .headers()
                .get("X-RateLimit-Reset")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(MastodonError::RateLimited { reset });
        }

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.map_err(|e| {
            MastodonError::InvalidResponse(format!(
                "request failed ({status}): failed to read response: {e}"
            ))
        })?;

        Err(MastodonError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// The `max_id` query parameter of the `rel="next"` entry of a Link header.
fn next_max_id(link: &str) -> Option<String> {
    let next = LINK_NEXT_RE.captures(link)?;
    let max_id = MAX_ID_RE.captures(next.get(1)?.as_str())?;
    Some(max_id[1].to_string())
}
