//! XRPC client for a PDS and the AppView it proxies.
//!
//! Every method issues exactly one request (plus a session lookup where
//! noted). Expired tokens surface as errors; refreshing and retrying is the
//! caller's decision.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::XrpcError;
use crate::{AtprotoError, CreateRecordResponse, Session, SessionInfo};

/// Client for interacting with an AT Protocol PDS.
pub struct AtprotoClient {
    http: Client,
    pds_url: String,
    session: Arc<RwLock<Option<Session>>>,
}

impl AtprotoClient {
    /// Create a new client for the given PDS URL.
    pub fn new(pds_url: impl Into<String>) -> Result<Self, AtprotoError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            pds_url: pds_url.into().trim_end_matches('/').to_string(),
            session: Arc::new(RwLock::new(None)),
        })
    }

    pub fn pds_url(&self) -> &str {
        &self.pds_url
    }

    /// Authenticate with the PDS using identifier and app password.
    pub async fn login(&self, identifier: &str, password: &str) -> Result<(), AtprotoError> {
        #[derive(Serialize)]
        struct LoginRequest<'a> {
            identifier: &'a str,
            password: &'a str,
        }

        let url = self.xrpc_url("com.atproto.server.createSession");
        let response = self
            .http
            .post(&url)
            .json(&LoginRequest {
                identifier,
                password,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AtprotoError::Auth(format!("login failed ({status}): {text}")));
        }

        let session: Session = response.json().await?;
        debug!(did = %session.did, handle = %session.handle, "authenticated with PDS");

        *self.session.write().await = Some(session);
        Ok(())
    }

    /// Install tokens issued elsewhere.
    ///
    /// When `did` is unknown the session is looked up with
    /// `com.atproto.server.getSession`.
    pub async fn resume(
        &self,
        access_jwt: String,
        refresh_jwt: Option<String>,
        did: Option<String>,
    ) -> Result<(), AtprotoError> {
        let (did, handle) = match did {
            Some(did) => (did, String::new()),
            None => {
                let response = self
                    .http
                    .get(self.xrpc_url("com.atproto.server.getSession"))
                    .bearer_auth(&access_jwt)
                    .send()
                    .await?;
                let info: SessionInfo = Self::handle_response(response).await?;
                (info.did, info.handle)
            }
        };
        debug!(did = %did, "resumed session");

        *self.session.write().await = Some(Session {
            did,
            handle,
            access_jwt,
            refresh_jwt: refresh_jwt.unwrap_or_default(),
        });
        Ok(())
    }

    /// Refresh the current session tokens with the refresh JWT.
    pub async fn refresh_session(&self) -> Result<(), AtprotoError> {
        let refresh_jwt = {
            let session = self.session.read().await;
            session
                .as_ref()
                .map(|s| s.refresh_jwt.clone())
                .filter(|jwt| !jwt.is_empty())
                .ok_or_else(|| AtprotoError::Auth("no session to refresh".to_string()))?
        };

        let response = self
            .http
            .post(self.xrpc_url("com.atproto.server.refreshSession"))
            .bearer_auth(refresh_jwt)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AtprotoError::Auth(format!("refresh failed ({status}): {text}")));
        }

        let session: Session = response.json().await?;
        debug!(did = %session.did, "refreshed session");

        *self.session.write().await = Some(session);
        Ok(())
    }

    /// Get the current session DID.
    pub async fn did(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.did.clone())
    }

    /// Get the current session handle.
    pub async fn handle(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.handle.clone())
            .filter(|h| !h.is_empty())
    }

    async fn access_token(&self) -> Result<String, AtprotoError> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_jwt.clone())
            .ok_or_else(|| AtprotoError::Auth("not authenticated".to_string()))
    }

    fn xrpc_url(&self, nsid: &str) -> String {
        format!("{}/xrpc/{}", self.pds_url, nsid)
    }

    /// Authenticated XRPC query.
    pub async fn query<T: DeserializeOwned>(
        &self,
        nsid: &str,
        params: &[(&str, String)],
    ) -> Result<T, AtprotoError> {
        let token = self.access_token().await?;
        debug!(nsid, "xrpc query");

        let response = self
            .http
            .get(self.xrpc_url(nsid))
            .bearer_auth(token)
            .query(params)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Create a record in the viewer's repository.
    ///
    /// The collection NSID is added to the record as its `$type`.
    pub async fn create_record<T: Serialize>(
        &self,
        collection: &str,
        record: &T,
    ) -> Result<CreateRecordResponse, AtprotoError> {
        let did = self
            .did()
            .await
            .ok_or_else(|| AtprotoError::Auth("not authenticated".to_string()))?;

        let mut record_value = serde_json::to_value(record)?;
        if let serde_json::Value::Object(ref mut map) = record_value {
            map.insert(
                "$type".to_string(),
                serde_json::Value::String(collection.to_string()),
            );
        }

        #[derive(Serialize)]
        struct CreateRequest<'a> {
            repo: &'a str,
            collection: &'a str,
            record: serde_json::Value,
        }

        let token = self.access_token().await?;
        let response = self
            .http
            .post(self.xrpc_url("com.atproto.repo.createRecord"))
            .bearer_auth(token)
            .json(&CreateRequest {
                repo: &did,
                collection,
                record: record_value,
            })
            .send()
            .await?;

        let created: CreateRecordResponse = Self::handle_response(response).await?;
        debug!(collection, uri = %created.uri, "created record");
        Ok(created)
    }

    /// Delete a record from the viewer's repository.
    pub async fn delete_record(&self, collection: &str, rkey: &str) -> Result<(), AtprotoError> {
        let did = self
            .did()
            .await
            .ok_or_else(|| AtprotoError::Auth("not authenticated".to_string()))?;

        #[derive(Serialize)]
        struct DeleteRequest<'a> {
            repo: &'a str,
            collection: &'a str,
            rkey: &'a str,
        }

        let token = self.access_token().await?;
        let response = self
            .http
            .post(self.xrpc_url("com.atproto.repo.deleteRecord"))
            .bearer_auth(token)
            .json(&DeleteRequest {
                repo: &did,
                collection,
                rkey,
            })
            .send()
            .await?;

        Self::check_status(response).await?;
        debug!(collection, rkey, "deleted record");
        Ok(())
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, AtprotoError> {
        let response = Self::check_status(response).await?;
        let body = response.json().await?;
        Ok(body)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AtprotoError> {
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(AtprotoError::RateLimited { retry_after_secs });
        }

        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.map_err(|e| {
            AtprotoError::InvalidResponse(format!(
                "request failed ({status}): failed to read response: {e}"
            ))
        })?;

        if let Ok(xrpc_error) = serde_json::from_str::<XrpcError>(&text) {
            return Err(AtprotoError::Xrpc {
                status: status.as_u16(),
                error: xrpc_error.error,
                message: xrpc_error.message,
            });
        }

        Err(AtprotoError::Status {
            status: status.as_u16(),
            body: text,
        })
    }
}
