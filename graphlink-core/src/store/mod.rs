//! Credential storage abstraction.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`CredentialStore`] - Trait for the external profile store
//! - [`MemoryStore`] - In-memory implementation for testing
//! - [`FileStore`] - JSON file implementation for development
//! - [`KeyringStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`create_store`] - Helper to select backend based on availability
//!
//! The lifecycle manager is the only writer; stores hold one
//! [`Credential`] record per [`IdentityId`].
//!
//! # Example
//!
//! ```rust,ignore
//! use graphlink_core::store::{CredentialStore, MemoryStore};
//!
//! let store = MemoryStore::new();
//! store.save(&identity, &credential).await?;
//! assert!(store.load(&identity).await?.is_some());
//! ```

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::model::IdentityId;
use crate::token::Credential;

mod file;
mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the buffer is wiped when the secret is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for credential store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// I/O error reading or writing a file-backed store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },

    /// No platform data directory could be determined.
    #[error("data directory not available")]
    DataDirUnavailable,
}

/// Adapter over the external profile store.
///
/// Implementations include:
/// - [`MemoryStore`] - In-memory storage for testing
/// - [`FileStore`] - JSON file on disk
/// - [`KeyringStore`] (with `keyring-store` feature) - OS keyring
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the credential for an identity.
    ///
    /// Returns `Ok(None)` if nothing is stored.
    async fn load(&self, identity: &IdentityId) -> Result<Option<Credential>, StoreError>;

    /// Persist a credential, replacing any existing record.
    async fn save(&self, identity: &IdentityId, credential: &Credential)
    -> Result<(), StoreError>;

    /// Remove the credential for an identity.
    ///
    /// Returns `Ok(())` even if nothing was stored.
    async fn clear(&self, identity: &IdentityId) -> Result<(), StoreError>;
}

/// Create a credential store with automatic backend selection.
///
/// - If `prefer_keyring` is `true` and the `keyring-store` feature is enabled,
///   attempts a [`KeyringStore`].
/// - Otherwise, or when the keyring is unavailable, opens a [`FileStore`] at
///   `fallback_path`.
/// - Without a usable file, returns a [`MemoryStore`] with a warning.
pub fn create_store(
    prefer_keyring: bool,
    fallback_path: Option<&Path>,
) -> Arc<dyn CredentialStore> {
    #[cfg(feature = "keyring-store")]
    if prefer_keyring {
        match KeyringStore::try_new("graphlink") {
            Ok(store) => {
                tracing::info!("Using OS keyring for credential storage");
                return Arc::new(store);
            }
            Err(e) => {
                tracing::warn!("Keyring unavailable ({}), falling back", e);
            }
        }
    }

    #[cfg(not(feature = "keyring-store"))]
    if prefer_keyring {
        tracing::warn!("Keyring storage requested but keyring-store feature not enabled");
    }

    if let Some(path) = fallback_path {
        match FileStore::open(path) {
            Ok(store) => {
                tracing::info!(path = ?path, "Using credentials file for credential storage");
                return Arc::new(store);
            }
            Err(e) => {
                tracing::warn!(path = ?path, "Credentials file unavailable ({})", e);
            }
        }
    }

    tracing::warn!("Using in-memory credential storage. Credentials will not persist across restarts.");
    Arc::new(MemoryStore::new())
}
