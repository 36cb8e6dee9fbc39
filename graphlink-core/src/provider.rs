//! Identity provider configuration and the token-endpoint contract.
//!
//! This module provides:
//! - [`ProviderConfig`] - Endpoints and client credentials for a provider
//! - [`IdentityProvider`] - Trait for exchanging a refresh token
//! - [`TokenGrant`] - A successful exchange
//! - [`ProviderError`] - A failed exchange, as reported by the provider

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ConfigError;
use crate::store::Secret;
use crate::token::Credential;

/// Configuration for an OAuth provider.
///
/// # Example
///
/// ```
/// use graphlink_core::provider::ProviderConfig;
///
/// let provider = ProviderConfig::microsoft_graph("contoso.onmicrosoft.com", "client-id");
/// assert!(provider.token_url.ends_with("/oauth2/v2.0/token"));
/// assert!(provider.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Human-readable name (e.g., "Microsoft Graph").
    pub name: String,

    /// OAuth authorization endpoint URL.
    pub auth_url: String,

    /// OAuth token endpoint URL.
    pub token_url: String,

    /// OAuth client ID registered with the provider.
    pub client_id: String,

    /// OAuth client secret, for confidential clients.
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Scopes re-requested on every refresh.
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl ProviderConfig {
    /// Create a new provider configuration.
    pub fn new(name: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auth_url: String::new(),
            token_url: String::new(),
            client_id: client_id.into(),
            client_secret: None,
            scopes: Vec::new(),
        }
    }

    /// Microsoft identity platform v2 endpoints for a tenant, with the
    /// scopes needed for meeting transcripts and outbound mail.
    pub fn microsoft_graph(tenant: &str, client_id: impl Into<String>) -> Self {
        Self::new("Microsoft Graph", client_id)
            .with_auth_url(format!(
                "https://login.microsoftonline.com/{tenant}/oauth2/v2.0/authorize"
            ))
            .with_token_url(format!(
                "https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token"
            ))
            .with_scopes(vec![
                "offline_access".to_string(),
                "OnlineMeetings.Read".to_string(),
                "OnlineMeetingTranscript.Read.All".to_string(),
                "Mail.Send".to_string(),
            ])
    }

    /// Set the authorization URL.
    pub fn with_auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = url.into();
        self
    }

    /// Set the token URL.
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Set the client secret.
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Set the scopes.
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Check that both endpoints parse as absolute URLs and a client ID is set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "provider.client_id",
                message: "must not be empty".to_string(),
            });
        }
        for (field, value) in [
            ("provider.auth_url", &self.auth_url),
            ("provider.token_url", &self.token_url),
        ] {
            url::Url::parse(value).map_err(|e| ConfigError::Invalid {
                field,
                message: format!("{value:?} is not a valid URL: {e}"),
            })?;
        }
        Ok(())
    }
}

/// A successful refresh-token exchange.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: Secret,

    /// Present when the provider rotated the refresh token.
    pub refresh_token: Option<Secret>,

    pub expires_at: DateTime<Utc>,
}

impl TokenGrant {
    /// Build the credential to persist, keeping the previous refresh token
    /// when the provider did not rotate it.
    pub fn into_credential(self, previous_refresh: &Secret) -> Credential {
        Credential {
            access_token: self.access_token,
            refresh_token: Some(self.refresh_token.unwrap_or_else(|| previous_refresh.clone())),
            expires_at: self.expires_at,
        }
    }
}

/// Error reported by the identity provider, or by the transport reaching it.
///
/// The original provider message is preserved verbatim; it is often the only
/// clue distinguishing the failure class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// Structured error code from the response body (`error` in RFC 6749).
    pub code: Option<String>,

    pub message: String,

    /// HTTP status of the response, when known.
    pub status: Option<u16>,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{}: {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Trait for the identity provider's token endpoint.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange a refresh token for a new access token.
    async fn refresh(&self, refresh_token: &Secret) -> Result<TokenGrant, ProviderError>;
}
