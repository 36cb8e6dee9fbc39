//! Per-user session context.
//!
//! A [`Session`] bundles the lifecycle manager of one identity with its
//! background refresh loop and a cancellation scope for dependent calls.
//! Ending the session stops the loop and abandons pending retries.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::LifecycleConfig;
use crate::error::GraphlinkError;
use crate::lifecycle::TokenLifecycleManager;
use crate::model::IdentityId;
use crate::provider::IdentityProvider;
use crate::resilience::{ResilienceOptions, ResilientOperation};
use crate::scheduler::RefreshScheduler;
use crate::store::CredentialStore;
use crate::token::ConnectionStatus;

/// Lifecycle manager, refresh loop and cancellation scope of one user session.
#[derive(Debug)]
pub struct Session {
    manager: Arc<TokenLifecycleManager>,
    scheduler: RefreshScheduler,
    cancel: CancellationToken,
}

impl Session {
    /// Build a manager for `identity` and start its refresh loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn begin(
        identity: IdentityId,
        store: Arc<dyn CredentialStore>,
        provider: Arc<dyn IdentityProvider>,
        config: LifecycleConfig,
    ) -> Result<Self, GraphlinkError> {
        config.validate()?;
        let manager = Arc::new(TokenLifecycleManager::new(identity, store, provider, config));
        Ok(Self::with_manager(manager))
    }

    /// Start a session around an existing manager.
    pub fn with_manager(manager: Arc<TokenLifecycleManager>) -> Self {
        let interval = manager.config().refresh_interval();
        let scheduler = RefreshScheduler::new(manager.clone(), interval);
        let cancel = CancellationToken::new();
        scheduler.start(&cancel);

        info!(identity = %manager.identity(), "session started");
        Self {
            manager,
            scheduler,
            cancel,
        }
    }

    pub fn manager(&self) -> &Arc<TokenLifecycleManager> {
        &self.manager
    }

    pub fn status(&self) -> ConnectionStatus {
        self.manager.status()
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Retry wrapper bound to this session.
    ///
    /// Uses the configured retry policy and stops retrying once the session
    /// ends.
    pub fn resilient(&self) -> ResilientOperation<'_, TokenLifecycleManager> {
        let options = ResilienceOptions::default()
            .with_policy(self.manager.config().retry.clone())
            .with_cancellation(self.cancel.child_token());
        ResilientOperation::with_options(self.manager.as_ref(), options)
    }

    /// Retry wrapper with explicit options.
    ///
    /// Without a cancellation token of their own, the options get one scoped
    /// to this session.
    pub fn resilient_with(
        &self,
        mut options: ResilienceOptions,
    ) -> ResilientOperation<'_, TokenLifecycleManager> {
        if options.cancel.is_none() {
            options.cancel = Some(self.cancel.child_token());
        }
        ResilientOperation::with_options(self.manager.as_ref(), options)
    }

    /// Token cancelled when this session ends, for callers that need their
    /// own narrower scope.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Restart the refresh loop, for example after a reconnect.
    pub fn restart_refresh(&self) {
        self.scheduler.start(&self.cancel);
    }

    /// Stop the refresh loop and cancel pending retries.
    pub fn end(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.scheduler.stop();
        info!(identity = %self.manager.identity(), "session ended");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderError, TokenGrant};
    use crate::resilience::Outcome;
    use crate::store::{MemoryStore, Secret};
    use crate::token::Credential;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};

    struct NoopProvider;

    #[async_trait]
    impl IdentityProvider for NoopProvider {
        async fn refresh(&self, _refresh_token: &Secret) -> Result<TokenGrant, ProviderError> {
            Err(ProviderError::new("unused"))
        }
    }

    fn session() -> Session {
        let identity = IdentityId::new("alice");
        let credential = Credential::new("a", Some("r"), Utc::now() + Duration::hours(1));
        Session::begin(
            identity.clone(),
            Arc::new(MemoryStore::with_credential(identity, credential)),
            Arc::new(NoopProvider),
            LifecycleConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_begin_rejects_invalid_config() {
        let config = LifecycleConfig {
            refresh_interval_secs: 0,
            ..LifecycleConfig::default()
        };
        let result = Session::begin(
            IdentityId::new("alice"),
            Arc::new(MemoryStore::new()),
            Arc::new(NoopProvider),
            config,
        );
        assert!(matches!(result, Err(GraphlinkError::Config(_))));
    }

    #[tokio::test]
    async fn test_resilient_call_uses_session_token() {
        let session = session();

        let outcome = session
            .resilient()
            .run(|token| async move { Ok::<_, crate::resilience::OperationError>(token.expose().to_string()) })
            .await;

        assert_eq!(outcome, Outcome::Success("a".to_string()));
    }

    #[tokio::test]
    async fn test_end_cancels_pending_retries() {
        let session = session();
        let operation = session.resilient();
        session.end();

        let outcome = operation
            .run(|_| async { Err::<(), _>(crate::resilience::OperationError::new("boom")) })
            .await;

        assert!(!session.is_active());
        match outcome {
            Outcome::Failure(err) => {
                assert_eq!(err.kind, crate::resilience::ErrorKind::Cancelled);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
