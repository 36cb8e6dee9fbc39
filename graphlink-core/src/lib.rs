//! # Graphlink Core
//!
//! Credential lifecycle and resilient external-API access for Graphlink.
//!
//! This crate provides:
//! - A per-identity token state machine with coalesced, rate-limited refresh
//! - Classification of provider failures as permanent, transient or unknown
//! - Memory, file and (optionally) keyring-based credential stores
//! - A retry wrapper that reauthenticates dependent calls after auth failures
//! - A cancellable background refresh loop owned by the user session
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use graphlink_core::{
//!     FileStore, IdentityId, LifecycleConfig, OAuthTokenEndpoint, ProviderConfig, Session,
//!     create_store,
//! };
//!
//! let provider = ProviderConfig::microsoft_graph("contoso.onmicrosoft.com", "client-id");
//! let session = Session::begin(
//!     IdentityId::new("alice@contoso.com"),
//!     create_store(true, FileStore::default_path().ok().as_deref()),
//!     Arc::new(OAuthTokenEndpoint::new(&provider)?),
//!     LifecycleConfig::default(),
//! )?;
//!
//! let outcome = session
//!     .resilient()
//!     .run(|token| async move { send_mail(token.expose()).await })
//!     .await;
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod model;
pub mod provider;
pub mod resilience;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod token;
pub mod transcript;

#[cfg(feature = "oauth")]
pub mod oauth;

// Re-export commonly used types at crate root
pub use model::{
    IdentityId,
    StateTransition,
    TokenState,
};

pub use store::{
    Secret,
    CredentialStore,
    StoreError,
    MemoryStore,
    FileStore,
    create_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use token::{
    Credential,
    ConnectionStatus,
    LifecycleError,
    TokenManager,
};

pub use classify::{
    ErrorClassifier,
    FailureClass,
};

pub use ledger::{
    AttemptLedger,
    ConnectionAttempt,
    LedgerConfig,
};

pub use config::{
    ConfigError,
    LifecycleConfig,
};

pub use provider::{
    IdentityProvider,
    ProviderConfig,
    ProviderError,
    TokenGrant,
};

pub use lifecycle::TokenLifecycleManager;

pub use resilience::{
    ErrorKind,
    OperationError,
    Outcome,
    ResilienceOptions,
    ResilientOperation,
    RetryContext,
    RetryPolicy,
    with_resilience,
};

pub use scheduler::{
    RefreshScheduler,
    spawn_refresh_task,
};

pub use session::Session;

pub use transcript::{
    Transcript,
    TranscriptLookup,
    classify_transcript,
    fetch_transcript,
};

pub use error::GraphlinkError;

#[cfg(feature = "oauth")]
pub use oauth::OAuthTokenEndpoint;
