//! Domain model types for Graphlink.
//!
//! This module defines the identifiers and states shared by the rest of the
//! crate:
//! - [`IdentityId`] - The user identity a credential belongs to
//! - [`TokenState`] - Where a credential sits in its lifecycle
//! - [`StateTransition`] - A single observed change of [`TokenState`]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for the portal user whose external connection is managed.
///
/// One [`TokenLifecycleManager`](crate::lifecycle::TokenLifecycleManager)
/// exists per identity; stores key their records by it.
///
/// # Examples
///
/// ```
/// use graphlink_core::IdentityId;
///
/// let id = IdentityId::new("alice@example.org");
/// assert_eq!(id.as_str(), "alice@example.org");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityId(String);

impl IdentityId {
    /// Create a new identity ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identity ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for IdentityId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for IdentityId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Lifecycle state of the managed credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    /// The store has not reported a credential.
    NoCredential,

    /// The access token is outside the proactive window.
    Valid,

    /// The access token expires within the proactive window.
    ExpiringSoon,

    /// A refresh request is in flight with the identity provider.
    RefreshInProgress,

    /// The last refresh failed transiently; the stale token is still exposed.
    TransientlyDegraded,

    /// The refresh token is unusable and the credential was cleared.
    NeedsReconnect,
}

impl TokenState {
    /// Get the state as a string for logs and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoCredential => "no_credential",
            Self::Valid => "valid",
            Self::ExpiringSoon => "expiring_soon",
            Self::RefreshInProgress => "refresh_in_progress",
            Self::TransientlyDegraded => "transiently_degraded",
            Self::NeedsReconnect => "needs_reconnect",
        }
    }

    /// Whether a credential is held in this state.
    pub fn holds_credential(&self) -> bool {
        !matches!(self, Self::NoCredential | Self::NeedsReconnect)
    }
}

impl fmt::Display for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single state change, broadcast to transition subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: TokenState,
    pub to: TokenState,
    pub at: DateTime<Utc>,
}
