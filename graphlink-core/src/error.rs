//! Top-level error types for Graphlink.

use thiserror::Error;

use crate::config::ConfigError;
use crate::provider::ProviderError;
use crate::resilience::OperationError;
use crate::store::StoreError;
use crate::token::LifecycleError;

/// Top-level error type encompassing all Graphlink errors.
#[derive(Debug, Error)]
pub enum GraphlinkError {
    /// Error from credential storage operations.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error from the token lifecycle.
    #[error("token error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Error reported by the identity provider.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error from a dependent call.
    #[error("operation error: {0}")]
    Operation(#[from] OperationError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
