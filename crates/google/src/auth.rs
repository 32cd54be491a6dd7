//! Access tokens for Google APIs.
//!
//! Three sources are supported: a fixed token, the runtime metadata server (the
//! service account of the Cloud Run service or VM), and an OAuth2 refresh-token grant.
//! Fetched tokens are cached until shortly before they expire.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quotedoc_core::config::{OAuthConfig, StoreAuth, StoreConfig};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Scopes requested from the metadata server for template work.
pub const STORE_SCOPES: [&str; 2] =
    ["https://www.googleapis.com/auth/drive", "https://www.googleapis.com/auth/documents"];

const DEFAULT_EXPIRES_IN_SECS: u64 = 3_600;
const MAX_LIFETIME_SECS: u64 = 86_400;
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credential `{0}`")]
    MissingCredential(&'static str),
    #[error("token request failed: {0}")]
    Request(String),
    #[error("token endpoint returned {status}: {message}")]
    Endpoint { status: u16, message: String },
    #[error("token response could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<SecretString, AuthError>;
}

pub struct StaticTokenSource {
    token: SecretString,
}

impl StaticTokenSource {
    pub fn new(token: SecretString) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<SecretString, AuthError> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Result<Self, AuthError> {
        if response.access_token.trim().is_empty() {
            return Err(AuthError::Decode("token endpoint returned an empty access token".into()));
        }
        let lifetime = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS).min(MAX_LIFETIME_SECS);
        let lifetime = chrono::Duration::seconds(lifetime as i64);
        Ok(Self { token: response.access_token.into(), expires_at: now + lifetime })
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(EXPIRY_MARGIN) {
            Ok(margin) => now + margin < self.expires_at,
            Err(_) => false,
        }
    }
}

/// Single-slot cache. The lock is held while a new token is fetched so concurrent
/// callers share one request.
#[derive(Default)]
struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<SecretString, AuthError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<TokenResponse, AuthError>>,
    {
        let mut slot = self.slot.lock().await;
        let now = Utc::now();
        if let Some(cached) = slot.as_ref().filter(|cached| cached.is_fresh(now)) {
            return Ok(cached.token.clone());
        }

        let cached = CachedToken::from_response(fetch().await?, Utc::now())?;
        debug!(
            event_name = "auth.token.refreshed",
            expires_at = %cached.expires_at.to_rfc3339(),
            "access token refreshed"
        );
        let token = cached.token.clone();
        *slot = Some(cached);
        Ok(token)
    }
}

async fn decode_token_response(response: reqwest::Response) -> Result<TokenResponse, AuthError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(AuthError::Endpoint { status: status.as_u16(), message });
    }
    response.json::<TokenResponse>().await.map_err(|error| AuthError::Decode(error.to_string()))
}

/// Tokens for the service account attached to the runtime.
pub struct MetadataTokenSource {
    client: Client,
    token_url: String,
    cache: TokenCache,
}

impl MetadataTokenSource {
    pub fn new(client: Client, metadata_url: &str, scopes: &[&str]) -> Self {
        let token_url = format!(
            "{}/instance/service-accounts/default/token?scopes={}",
            metadata_url.trim_end_matches('/'),
            scopes.join(",")
        );
        Self { client, token_url, cache: TokenCache::default() }
    }
}

#[async_trait]
impl TokenSource for MetadataTokenSource {
    async fn access_token(&self) -> Result<SecretString, AuthError> {
        self.cache
            .get_or_fetch(|| async {
                let response = self
                    .client
                    .get(&self.token_url)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .map_err(|error| AuthError::Request(error.to_string()))?;
                decode_token_response(response).await
            })
            .await
    }
}

/// OAuth2 refresh-token grant, e.g. for a Gmail sender account.
pub struct RefreshTokenSource {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    refresh_token: SecretString,
    cache: TokenCache,
}

impl RefreshTokenSource {
    pub fn new(
        client: Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
        refresh_token: SecretString,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret,
            refresh_token,
            cache: TokenCache::default(),
        }
    }

    pub fn from_config(client: Client, oauth: &OAuthConfig) -> Result<Self, AuthError> {
        let client_id =
            oauth.client_id.clone().ok_or(AuthError::MissingCredential("oauth.client_id"))?;
        let client_secret = oauth
            .client_secret
            .clone()
            .ok_or(AuthError::MissingCredential("oauth.client_secret"))?;
        let refresh_token = oauth
            .refresh_token
            .clone()
            .ok_or(AuthError::MissingCredential("oauth.refresh_token"))?;
        Ok(Self::new(client, oauth.token_url.clone(), client_id, client_secret, refresh_token))
    }
}

#[async_trait]
impl TokenSource for RefreshTokenSource {
    async fn access_token(&self) -> Result<SecretString, AuthError> {
        self.cache
            .get_or_fetch(|| async {
                let response = self
                    .client
                    .post(&self.token_url)
                    .form(&[
                        ("grant_type", "refresh_token"),
                        ("client_id", self.client_id.as_str()),
                        ("client_secret", self.client_secret.expose_secret()),
                        ("refresh_token", self.refresh_token.expose_secret()),
                    ])
                    .send()
                    .await
                    .map_err(|error| AuthError::Request(error.to_string()))?;
                decode_token_response(response).await
            })
            .await
    }
}

/// Token source for the template store, per `store.auth`.
pub fn store_token_source(
    client: Client,
    store: &StoreConfig,
    oauth: &OAuthConfig,
) -> Result<Arc<dyn TokenSource>, AuthError> {
    match store.auth {
        StoreAuth::Metadata => {
            Ok(Arc::new(MetadataTokenSource::new(client, &store.metadata_url, &STORE_SCOPES)))
        }
        StoreAuth::Static => {
            let token = store
                .access_token
                .clone()
                .ok_or(AuthError::MissingCredential("store.access_token"))?;
            Ok(Arc::new(StaticTokenSource::new(token)))
        }
        StoreAuth::RefreshToken => Ok(Arc::new(RefreshTokenSource::from_config(client, oauth)?)),
    }
}
