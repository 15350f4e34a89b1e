//! Credentials for the single service principal the handler runs as
//!
//! Every scope shares one principal with a fixed permission scope, so a
//! credential is built once at startup and handed to each [`super::ScopeContext`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::RemoteError;

/// Tokens are refreshed this long before they expire
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Provides bearer tokens for ARM and Resource Graph calls
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn token(&self) -> Result<String, RemoteError>;
}

/// A pre-issued bearer token, e.g. injected by a managed-identity sidecar
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticToken {
    async fn token(&self) -> Result<String, RemoteError> {
        Ok(self.token.clone())
    }
}

#[derive(Clone, Debug)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// OAuth2 client-credentials flow against the identity authority
pub struct ClientSecretCredential {
    client: Client,
    authority_host: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    resource_scope: String,
    cached: RwLock<Option<CachedToken>>,
}

impl ClientSecretCredential {
    pub fn new(
        client: Client,
        authority_host: &str,
        tenant_id: &str,
        client_id: &str,
        client_secret: &str,
        arm_endpoint: &str,
    ) -> Self {
        Self {
            client,
            authority_host: authority_host.trim_end_matches('/').to_string(),
            tenant_id: tenant_id.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            resource_scope: format!("{}/.default", arm_endpoint.trim_end_matches('/')),
            cached: RwLock::new(None),
        }
    }

    pub fn into_shared(self) -> Arc<dyn TokenCredential> {
        Arc::new(self)
    }

    async fn fetch(&self) -> Result<CachedToken, RemoteError> {
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host, self.tenant_id
        );
        debug!("Requesting access token from {}", url);

        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", self.resource_scope.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // The token endpoint answers 400 for bad secrets and unknown clients.
            return Err(if status.is_client_error() {
                RemoteError::Unauthorized(body)
            } else {
                RemoteError::from_status(status, body)
            });
        }

        let token: TokenResponse = response.json().await?;
        info!(
            "Acquired access token for client {} (expires in {}s)",
            self.client_id, token.expires_in
        );
        Ok(CachedToken {
            value: token.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(token.expires_in as i64),
        })
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn token(&self) -> Result<String, RemoteError> {
        let margin = chrono::Duration::from_std(REFRESH_MARGIN)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));

        if let Some(cached) = self.cached.read().await.as_ref() {
            if cached.expires_at - margin > Utc::now() {
                return Ok(cached.value.clone());
            }
        }

        let mut slot = self.cached.write().await;
        // Another task may have refreshed while we waited for the write lock.
        if let Some(cached) = slot.as_ref() {
            if cached.expires_at - margin > Utc::now() {
                return Ok(cached.value.clone());
            }
        }
        let fresh = self.fetch().await?;
        let value = fresh.value.clone();
        *slot = Some(fresh);
        Ok(value)
    }
}
