//! Credential types and the token lifecycle contract.
//!
//! This module provides:
//! - [`Credential`] - The persisted access/refresh token pair with expiry
//! - [`ConnectionStatus`] - Derived read model exposed to UI and features
//! - [`LifecycleError`] - Typed failures returned by the lifecycle manager
//! - [`TokenManager`] - Trait consumed by dependent operations

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::TokenState;
use crate::store::{Secret, StoreError};

/// Error type for token lifecycle operations.
///
/// Cloneable so a single refresh outcome can be handed to every caller that
/// waited on it.
#[derive(Debug, Clone, Error)]
pub enum LifecycleError {
    /// No credential is stored for the identity.
    #[error("not connected: no credential stored for {identity}")]
    NotConnected { identity: String },

    /// The refresh token is unusable; the user must authorize again.
    #[error("reconnect required: {message}")]
    ReconnectRequired { message: String },

    /// Refresh failed for a reason worth retrying later.
    #[error("token refresh failed: {message}")]
    Transient { message: String },

    /// This process refused to contact the provider.
    #[error("too many connection attempts, try again in {}s", retry_after.as_secs())]
    RateLimited { retry_after: std::time::Duration },

    /// Contract or programmer error; not retried.
    #[error("token refresh rejected: {message}")]
    Unknown { message: String },

    /// Reading or writing the credential store failed.
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        Self::Storage {
            message: err.to_string(),
        }
    }
}

/// The token pair for one identity's external-provider connection.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: Secret,

    /// Absent when the provider never issued one; such a credential cannot
    /// be refreshed.
    pub refresh_token: Option<Secret>,

    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<impl Into<String>>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: Secret::new(access_token),
            refresh_token: refresh_token.map(Secret::new),
            expires_at,
        }
    }

    /// Check if the access token has expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Check if the access token expires within the given duration.
    pub fn expires_within(&self, window: Duration) -> bool {
        self.expires_at <= Utc::now() + window
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &self.access_token)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Read-only view of the connection, recomputed on every state change.
///
/// `is_connected == false` always comes with `access_token == None`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub state: TokenState,
    pub is_connected: bool,
    pub is_expired: bool,

    #[serde(skip_serializing)]
    pub access_token: Option<Secret>,

    pub expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub can_attempt_connection: bool,
    pub connection_attempt_count: usize,
}

impl ConnectionStatus {
    /// Status of a manager that has not seen a credential yet.
    pub fn disconnected() -> Self {
        Self {
            state: TokenState::NoCredential,
            is_connected: false,
            is_expired: false,
            access_token: None,
            expires_at: None,
            last_error: None,
            can_attempt_connection: true,
            connection_attempt_count: 0,
        }
    }

    /// Whether the user has to authorize again before anything works.
    pub fn needs_reconnect(&self) -> bool {
        self.state == TokenState::NeedsReconnect
    }
}

/// Trait for obtaining access tokens on behalf of dependent operations.
///
/// [`TokenLifecycleManager`](crate::lifecycle::TokenLifecycleManager) is the
/// production implementation; retry wrappers and the background scheduler
/// only depend on this trait.
#[async_trait]
pub trait TokenManager: Send + Sync {
    /// Get a usable access token, refreshing at most once if it is stale.
    async fn ensure_valid_token(&self) -> Result<Secret, LifecycleError>;

    /// Refresh regardless of expiry, subject to the attempt rate limit.
    async fn force_refresh(&self) -> Result<Secret, LifecycleError>;

    /// Drop the credential and forget previous attempts.
    async fn disconnect(&self) -> Result<(), LifecycleError>;

    /// Current connection status.
    fn status(&self) -> ConnectionStatus;
}
