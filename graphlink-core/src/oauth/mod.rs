//! OAuth 2.0 token endpoint client.
//!
//! [`OAuthTokenEndpoint`] implements [`IdentityProvider`] by performing the
//! refresh-token grant against a provider's token URL. Provider error
//! responses keep their `error` code and `error_description` so the
//! classifier can tell a revoked grant from an outage.
//!
//! # Features
//!
//! This module is only available when the `oauth` feature is enabled.

use std::sync::atomic::{AtomicU16, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use oauth2::{
    basic::{BasicClient, BasicErrorResponse},
    reqwest::async_http_client,
    AuthUrl, ClientId, ClientSecret, RefreshToken, RequestTokenError, Scope, TokenResponse,
    TokenUrl,
};
use tracing::debug;

use crate::config::ConfigError;
use crate::provider::{IdentityProvider, ProviderConfig, ProviderError, TokenGrant};
use crate::store::Secret;

/// Lifetime assumed when the provider omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Create an OAuth2 client from a provider configuration.
pub fn create_oauth_client(config: &ProviderConfig) -> Result<BasicClient, ConfigError> {
    let auth_url = AuthUrl::new(config.auth_url.clone()).map_err(|e| ConfigError::Invalid {
        field: "provider.auth_url",
        message: e.to_string(),
    })?;

    let token_url = TokenUrl::new(config.token_url.clone()).map_err(|e| ConfigError::Invalid {
        field: "provider.token_url",
        message: e.to_string(),
    })?;

    Ok(BasicClient::new(
        ClientId::new(config.client_id.clone()),
        config.client_secret.clone().map(ClientSecret::new),
        auth_url,
        Some(token_url),
    ))
}

/// Refresh-token grant against a real token endpoint.
pub struct OAuthTokenEndpoint {
    client: BasicClient,
    scopes: Vec<String>,
    name: String,
}

impl OAuthTokenEndpoint {
    pub fn new(config: &ProviderConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            client: create_oauth_client(config)?,
            scopes: config.scopes.clone(),
            name: config.name.clone(),
        })
    }
}

impl std::fmt::Debug for OAuthTokenEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenEndpoint")
            .field("name", &self.name)
            .field("scopes", &self.scopes)
            .finish()
    }
}

#[async_trait]
impl IdentityProvider for OAuthTokenEndpoint {
    async fn refresh(&self, refresh_token: &Secret) -> Result<TokenGrant, ProviderError> {
        debug!(provider = %self.name, "exchanging refresh token");

        let refresh_token = RefreshToken::new(refresh_token.expose().to_string());
        // 0 until the endpoint answers.
        let status = AtomicU16::new(0);
        let status_ref = &status;
        let response = self
            .client
            .exchange_refresh_token(&refresh_token)
            .add_scopes(self.scopes.iter().cloned().map(Scope::new))
            .request_async(move |request| async move {
                let response = async_http_client(request).await;
                if let Ok(response) = &response {
                    status_ref.store(response.status_code.as_u16(), Ordering::Relaxed);
                }
                response
            })
            .await
            .map_err(|e| {
                let status = Some(status.load(Ordering::Relaxed)).filter(|s| *s != 0);
                provider_error(e, status)
            })?;

        let lifetime = response
            .expires_in()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .unwrap_or_else(|| chrono::Duration::seconds(DEFAULT_EXPIRES_IN_SECS));

        Ok(TokenGrant {
            access_token: Secret::new(response.access_token().secret().as_str()),
            refresh_token: response
                .refresh_token()
                .map(|t| Secret::new(t.secret().as_str())),
            expires_at: Utc::now() + lifetime,
        })
    }
}

fn provider_error<RE>(
    err: RequestTokenError<RE, BasicErrorResponse>,
    status: Option<u16>,
) -> ProviderError
where
    RE: std::error::Error + 'static,
{
    let error = match err {
        RequestTokenError::ServerResponse(response) => {
            let code = response.error().to_string();
            let message = response
                .error_description()
                .cloned()
                .unwrap_or_else(|| code.clone());
            ProviderError::new(message).with_code(code)
        }
        RequestTokenError::Request(e) => ProviderError::new(format!("token request failed: {}", e)),
        // Outages often answer with an HTML error page.
        RequestTokenError::Parse(e, _) => {
            ProviderError::new(format!("unreadable token endpoint response: {}", e))
        }
        RequestTokenError::Other(message) => ProviderError::new(message),
    };

    match status {
        Some(status) => error.with_status(status),
        None => error,
    }
}
