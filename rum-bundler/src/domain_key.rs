//! Per-domain key lookup for the bundle API.
//!
//! Resolution is fail-soft: any problem yields `DomainKey::Unresolved` and the
//! fetch proceeds without a key.

use crate::metrics_defs::DOMAIN_KEY_UNRESOLVED;
use crate::types::join_segments;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use shared::counter;
use url::Url;

/// Environment variable holding the bearer token used for key lookups.
pub const ADMIN_KEY_ENV: &str = "RUM_ADMIN_KEY";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DomainKey {
    Resolved(String),
    Unresolved,
}

impl DomainKey {
    pub fn is_resolved(&self) -> bool {
        matches!(self, DomainKey::Resolved(_))
    }

    /// Value sent as the `domainkey` query parameter. Empty when unresolved.
    pub fn as_query_value(&self) -> &str {
        match self {
            DomainKey::Resolved(key) => key,
            DomainKey::Unresolved => "",
        }
    }
}

impl From<String> for DomainKey {
    fn from(key: String) -> Self {
        if key.is_empty() {
            DomainKey::Unresolved
        } else {
            DomainKey::Resolved(key)
        }
    }
}

#[async_trait]
pub trait DomainKeyProvider: Send + Sync {
    async fn resolve(&self, domain: &str) -> DomainKey;
}

#[derive(thiserror::Error, Debug)]
enum DomainKeyError {
    #[error("no admin token configured (RUM_ADMIN_KEY is unset)")]
    MissingToken,
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
    #[error("empty domain key in response")]
    EmptyKey,
}

#[derive(Deserialize)]
struct DomainKeyResponse {
    domainkey: String,
}

/// Looks up domain keys from `{base}/domainkey/{domain}` using a bearer token.
#[derive(Clone)]
pub struct DomainKeyResolver {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl DomainKeyResolver {
    pub fn new(client: reqwest::Client, base_url: Url, token: Option<String>) -> Self {
        DomainKeyResolver {
            client,
            base_url,
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Reads the token from `RUM_ADMIN_KEY` once; it is kept for the lifetime
    /// of the resolver.
    pub fn from_env(client: reqwest::Client, base_url: Url) -> Self {
        Self::new(client, base_url, std::env::var(ADMIN_KEY_ENV).ok())
    }

    async fn lookup(&self, domain: &str) -> Result<String, DomainKeyError> {
        let token = self.token.as_deref().ok_or(DomainKeyError::MissingToken)?;
        let url = join_segments(&self.base_url, &["domainkey", domain])
            .ok_or_else(|| DomainKeyError::InvalidUrl(self.base_url.to_string()))?;

        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DomainKeyError::Status(response.status()));
        }

        let key = response.json::<DomainKeyResponse>().await?.domainkey;
        if key.is_empty() {
            return Err(DomainKeyError::EmptyKey);
        }
        Ok(key)
    }
}

#[async_trait]
impl DomainKeyProvider for DomainKeyResolver {
    async fn resolve(&self, domain: &str) -> DomainKey {
        match self.lookup(domain).await {
            Ok(key) => DomainKey::Resolved(key),
            Err(err) => {
                tracing::warn!(
                    domain,
                    error = %err,
                    "Could not resolve domain key, continuing without one"
                );
                counter!(DOMAIN_KEY_UNRESOLVED).increment(1);
                DomainKey::Unresolved
            }
        }
    }
}
