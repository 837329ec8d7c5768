use crate::common::error::DeployError;
use crate::common::result::DeployResult;
use crate::domain::entities::{Credential, RefreshMaterial};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Mints bearer credentials for the platform API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Obtain a fresh credential.
    async fn fetch_token(&self) -> DeployResult<Credential>;

    /// Principal id of the identity the tokens are issued to, when known.
    fn identity(&self) -> Option<String>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// OAuth2 client-credentials grant against the identity provider.
pub struct ClientCredentialsTokenSource {
    client: reqwest::Client,
    material: RefreshMaterial,
}

impl ClientCredentialsTokenSource {
    pub fn new(material: RefreshMaterial) -> DeployResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DeployError::internal_error_with_source("Failed to build HTTP client", e))?;
        Ok(Self { client, material })
    }

    pub fn with_client(client: reqwest::Client, material: RefreshMaterial) -> Self {
        Self { client, material }
    }
}

impl fmt::Debug for ClientCredentialsTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentialsTokenSource")
            .field("material", &self.material)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenSource for ClientCredentialsTokenSource {
    async fn fetch_token(&self) -> DeployResult<Credential> {
        let url = self.material.token_url();
        debug!(token_url = %url, client_id = %self.material.client_id, "requesting access token");

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.material.client_id.as_str()),
            ("client_secret", self.material.client_secret.as_str()),
            ("scope", self.material.scope.as_str()),
        ];

        let response = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| DeployError::authentication_error_with_source("Token endpoint unreachable", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DeployError::authentication_error_with_source("Failed to read token response", e))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<TokenErrorResponse>(&body)
                .map(|e| match e.error_description {
                    Some(description) => format!("{}: {}", e.error, description),
                    None => e.error,
                })
                .unwrap_or_else(|_| format!("HTTP {}", status.as_u16()));
            return Err(DeployError::authentication_error(format!(
                "Token request rejected: {}",
                detail
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| DeployError::authentication_error_with_source("Malformed token response", e))?;

        Ok(Credential::expiring_in(
            token.access_token,
            Duration::from_secs(token.expires_in),
        ))
    }

    fn identity(&self) -> Option<String> {
        Some(self.material.client_id.clone())
    }
}

/// Pre-issued token taken from the environment; it cannot be renewed.
pub struct StaticTokenSource {
    token: String,
    lifetime: Duration,
    identity: Option<String>,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            lifetime: Duration::from_secs(3600),
            identity: None,
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }
}

impl fmt::Debug for StaticTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenSource")
            .field("token", &"<redacted>")
            .field("lifetime", &self.lifetime)
            .field("identity", &self.identity)
            .finish()
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn fetch_token(&self) -> DeployResult<Credential> {
        if self.token.trim().is_empty() {
            return Err(DeployError::missing_credential("FABDEPLOY_TOKEN"));
        }
        Ok(Credential::expiring_in(self.token.clone(), self.lifetime))
    }

    fn identity(&self) -> Option<String> {
        self.identity.clone()
    }
}
