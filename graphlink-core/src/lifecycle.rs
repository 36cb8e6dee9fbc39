//! Token lifecycle state machine.
//!
//! This module provides [`TokenLifecycleManager`], the sole owner of one
//! identity's [`Credential`] and [`ConnectionStatus`].
//!
//! # Features
//!
//! - Proactive refresh once the token enters the expiry window
//! - One in-flight refresh at a time; concurrent callers share its outcome
//! - Permanent failures clear the stored credential, transient ones keep it
//! - Attempt rate limiting through an [`AttemptLedger`]
//! - Status published through a `watch` channel, transitions through a
//!   `broadcast` channel
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use graphlink_core::{IdentityId, LifecycleConfig, MemoryStore, TokenLifecycleManager};
//!
//! let manager = TokenLifecycleManager::new(
//!     IdentityId::new("alice@example.org"),
//!     Arc::new(MemoryStore::new()),
//!     provider,
//!     LifecycleConfig::default(),
//! );
//!
//! let token = manager.ensure_valid_token().await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::{
    classify::{ErrorClassifier, FailureClass},
    config::LifecycleConfig,
    ledger::{AttemptLedger, ConnectionAttempt},
    model::{IdentityId, StateTransition, TokenState},
    provider::{IdentityProvider, ProviderError},
    store::{CredentialStore, Secret, StoreError},
    token::{ConnectionStatus, Credential, LifecycleError, TokenManager},
};

/// Transitions buffered for slow subscribers before they start lagging.
const TRANSITION_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshMode {
    /// Triggered by expiry; a still-valid token satisfies the caller.
    Proactive,
    /// Triggered explicitly; always exchanges the refresh token.
    Forced,
}

struct Inner {
    state: TokenState,
    credential: Option<Credential>,
    last_error: Option<String>,
    ledger: AttemptLedger,

    /// Bumped every time a refresh finishes or the credential is replaced.
    refresh_epoch: u64,

    /// Outcome of the most recent finished refresh, handed to callers that
    /// queued behind it.
    last_refresh: Option<Result<Secret, LifecycleError>>,
}

/// Owns the credential state machine for one identity.
///
/// Construct one per user session and share it by `Arc`; nothing in this
/// crate keeps auth state in globals.
pub struct TokenLifecycleManager {
    identity: IdentityId,
    store: Arc<dyn CredentialStore>,
    provider: Arc<dyn IdentityProvider>,
    config: LifecycleConfig,
    inner: Mutex<Inner>,

    /// Held for the whole duration of a provider exchange.
    refresh_gate: tokio::sync::Mutex<()>,

    status_tx: watch::Sender<ConnectionStatus>,
    transitions_tx: broadcast::Sender<StateTransition>,
}

impl TokenLifecycleManager {
    /// Create a manager in the `NoCredential` state.
    ///
    /// The store is consulted lazily on the first token request.
    pub fn new(
        identity: IdentityId,
        store: Arc<dyn CredentialStore>,
        provider: Arc<dyn IdentityProvider>,
        config: LifecycleConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::disconnected());
        let (transitions_tx, _) = broadcast::channel(TRANSITION_BUFFER);

        Self {
            identity,
            store,
            provider,
            inner: Mutex::new(Inner {
                state: TokenState::NoCredential,
                credential: None,
                last_error: None,
                ledger: AttemptLedger::new(config.ledger),
                refresh_epoch: 0,
                last_refresh: None,
            }),
            config,
            refresh_gate: tokio::sync::Mutex::new(()),
            status_tx,
            transitions_tx,
        }
    }

    pub fn identity(&self) -> &IdentityId {
        &self.identity
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TokenState {
        self.inner.lock().state
    }

    /// Current connection status, with expiry evaluated against now.
    pub fn status(&self) -> ConnectionStatus {
        let inner = self.inner.lock();
        self.build_status(&inner)
    }

    /// Subscribe to status updates published on every change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Subscribe to individual state transitions.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions_tx.subscribe()
    }

    /// Snapshot of the retained connection attempts, oldest first.
    pub fn attempts(&self) -> Vec<ConnectionAttempt> {
        self.inner.lock().ledger.attempts().cloned().collect()
    }

    /// Load the stored credential, if not loaded yet, without refreshing.
    pub async fn restore(&self) -> Result<TokenState, LifecycleError> {
        self.load_if_needed().await?;
        let mut inner = self.inner.lock();
        self.reevaluate(&mut inner);
        Ok(inner.state)
    }

    /// Hand over a credential obtained by a completed external authorization.
    ///
    /// Replaces whatever was held before, including a `NeedsReconnect` state.
    pub async fn connect(&self, credential: Credential) -> Result<(), LifecycleError> {
        let _gate = self.refresh_gate.lock().await;

        if let Err(e) = self.store.save(&self.identity, &credential).await {
            return Err(self.storage_failure(e));
        }

        let mut inner = self.inner.lock();
        let next = self.expiry_state(&credential);
        inner.credential = Some(credential);
        inner.last_error = None;
        inner.ledger.record(true, None);
        inner.refresh_epoch += 1;
        inner.last_refresh = None;
        self.transition(&mut inner, next);
        self.publish(&inner);

        info!(identity = %self.identity, state = %next, "credential connected");
        Ok(())
    }

    /// Get a usable access token.
    ///
    /// Returns the cached token while it is outside the proactive window.
    /// Otherwise performs at most one refresh; callers wanting retries wrap
    /// their work in [`ResilientOperation`](crate::resilience::ResilientOperation).
    /// Every failure path also lands in [`ConnectionStatus::last_error`].
    pub async fn ensure_valid_token(&self) -> Result<Secret, LifecycleError> {
        self.load_if_needed().await?;

        let observed = {
            let mut inner = self.inner.lock();
            self.reevaluate(&mut inner);

            match inner.state {
                TokenState::Valid => {
                    return match inner.credential.as_ref() {
                        Some(credential) => {
                            debug!(identity = %self.identity, "using cached access token");
                            Ok(credential.access_token.clone())
                        }
                        None => Err(self.not_connected()),
                    };
                }
                TokenState::NoCredential => return Err(self.not_connected()),
                TokenState::NeedsReconnect => return Err(self.reconnect_required(&inner)),
                TokenState::ExpiringSoon
                | TokenState::RefreshInProgress
                | TokenState::TransientlyDegraded => inner.refresh_epoch,
            }
        };

        self.refresh(observed, RefreshMode::Proactive).await
    }

    /// Refresh regardless of the proactive window.
    ///
    /// A rate-limit denial returns immediately and is not recorded as an
    /// attempt.
    pub async fn force_refresh(&self) -> Result<Secret, LifecycleError> {
        self.load_if_needed().await?;

        let observed = {
            let mut inner = self.inner.lock();
            match inner.state {
                TokenState::NoCredential => return Err(self.not_connected()),
                TokenState::NeedsReconnect => return Err(self.reconnect_required(&inner)),
                _ => {}
            }
            if let Some(err) = self.rate_limited(&inner) {
                return Err(self.deny(&mut inner, err));
            }
            inner.refresh_epoch
        };

        self.refresh(observed, RefreshMode::Forced).await
    }

    /// Clear the stored credential and the attempt history.
    ///
    /// Waits for an in-flight refresh so it cannot resurrect the credential.
    pub async fn disconnect(&self) -> Result<(), LifecycleError> {
        let _gate = self.refresh_gate.lock().await;

        if let Err(e) = self.store.clear(&self.identity).await {
            return Err(self.storage_failure(e));
        }

        let mut inner = self.inner.lock();
        inner.credential = None;
        inner.last_error = None;
        inner.ledger.reset();
        inner.refresh_epoch += 1;
        inner.last_refresh = Some(Err(self.not_connected()));
        self.transition(&mut inner, TokenState::NoCredential);
        self.publish(&inner);

        info!(identity = %self.identity, "disconnected");
        Ok(())
    }

    async fn load_if_needed(&self) -> Result<(), LifecycleError> {
        if self.inner.lock().state != TokenState::NoCredential {
            return Ok(());
        }

        let loaded = match self.store.load(&self.identity).await {
            Ok(loaded) => loaded,
            Err(e) => return Err(self.storage_failure(e)),
        };

        let mut inner = self.inner.lock();
        if inner.state != TokenState::NoCredential {
            return Ok(());
        }
        if let Some(credential) = loaded {
            let next = self.expiry_state(&credential);
            inner.credential = Some(credential);
            self.transition(&mut inner, next);
            debug!(identity = %self.identity, state = %next, "loaded credential from store");
        }
        Ok(())
    }

    /// Single-flight refresh. Callers that observed an older epoch than the
    /// current one take the outcome of the refresh that finished meanwhile.
    async fn refresh(&self, observed: u64, mode: RefreshMode) -> Result<Secret, LifecycleError> {
        let _gate = self.refresh_gate.lock().await;

        let refresh_token = {
            let mut inner = self.inner.lock();

            if inner.refresh_epoch != observed {
                if let Some(outcome) = inner.last_refresh.clone() {
                    debug!(identity = %self.identity, "sharing outcome of concurrent refresh");
                    return outcome;
                }
            }

            match (inner.state, mode) {
                (TokenState::NoCredential, _) => return Err(self.not_connected()),
                (TokenState::NeedsReconnect, _) => return Err(self.reconnect_required(&inner)),
                (TokenState::Valid, RefreshMode::Proactive) => {
                    if let Some(credential) = inner.credential.as_ref() {
                        return Ok(credential.access_token.clone());
                    }
                }
                _ => {}
            }

            if let Some(err) = self.rate_limited(&inner) {
                if mode == RefreshMode::Proactive {
                    if let Some(credential) = inner.credential.as_ref().filter(|c| !c.is_expired()) {
                        debug!(identity = %self.identity, "refresh deferred by rate limit, token still valid");
                        return Ok(credential.access_token.clone());
                    }
                }
                return Err(self.deny(&mut inner, err));
            }

            let refresh_token = inner
                .credential
                .as_ref()
                .and_then(|c| c.refresh_token.clone());
            if refresh_token.is_some() {
                if inner.state == TokenState::TransientlyDegraded {
                    self.transition(&mut inner, TokenState::ExpiringSoon);
                }
                self.transition(&mut inner, TokenState::RefreshInProgress);
            }
            refresh_token
        };

        let outcome = match refresh_token {
            None => {
                self.on_permanent_failure("no refresh token is stored for this connection", false)
                    .await
            }
            Some(refresh_token) => {
                info!(identity = %self.identity, mode = ?mode, "refreshing access token");
                match self.provider.refresh(&refresh_token).await {
                    Ok(grant) => self.on_refresh_success(grant.into_credential(&refresh_token)).await,
                    Err(err) => self.on_refresh_failure(err).await,
                }
            }
        };

        let mut inner = self.inner.lock();
        inner.refresh_epoch += 1;
        inner.last_refresh = Some(outcome.clone());
        outcome
    }

    async fn on_refresh_success(&self, credential: Credential) -> Result<Secret, LifecycleError> {
        let persisted = self.store.save(&self.identity, &credential).await;

        let mut inner = self.inner.lock();
        let token = credential.access_token.clone();
        let expires_at = credential.expires_at;
        inner.ledger.record(true, None);
        inner.credential = Some(credential);
        inner.last_error = match persisted {
            Ok(()) => None,
            Err(e) => {
                error!(identity = %self.identity, error = %e, "failed to persist refreshed credential");
                Some(format!("refreshed credential could not be saved: {}", e))
            }
        };
        self.transition(&mut inner, TokenState::Valid);
        self.publish(&inner);

        info!(identity = %self.identity, %expires_at, "access token refreshed");
        Ok(token)
    }

    async fn on_refresh_failure(&self, err: ProviderError) -> Result<Secret, LifecycleError> {
        let class = ErrorClassifier::classify(&err);
        let message = err.to_string();

        if class == FailureClass::PermanentAuthFailure {
            return self.on_permanent_failure(&message, true).await;
        }

        let mut inner = self.inner.lock();
        inner.ledger.record(false, Some(message.clone()));
        inner.last_error = Some(message.clone());
        self.transition(&mut inner, TokenState::TransientlyDegraded);
        self.publish(&inner);

        warn!(
            identity = %self.identity,
            class = %class,
            error = %message,
            "token refresh failed, keeping last known token"
        );

        Err(match class {
            FailureClass::Unknown => LifecycleError::Unknown { message },
            _ => LifecycleError::Transient { message },
        })
    }

    async fn on_permanent_failure(
        &self,
        reason: &str,
        attempted: bool,
    ) -> Result<Secret, LifecycleError> {
        let cleared = self.store.clear(&self.identity).await;

        let mut inner = self.inner.lock();
        if attempted {
            inner.ledger.record(false, Some(reason.to_string()));
        }
        if let Err(e) = cleared {
            error!(identity = %self.identity, error = %e, "failed to clear rejected credential");
        }

        let message = format!(
            "the connection to your account has expired or was revoked, please reconnect ({})",
            reason
        );
        inner.credential = None;
        inner.last_error = Some(message.clone());
        self.transition(&mut inner, TokenState::NeedsReconnect);
        self.publish(&inner);

        error!(identity = %self.identity, error = %reason, "refresh token rejected, reconnect required");
        Err(LifecycleError::ReconnectRequired { message })
    }

    /// Checks the limiter; on denial records the reason in `last_error`.
    fn rate_limited(&self, inner: &Inner) -> Option<LifecycleError> {
        let now = Utc::now();
        if inner.ledger.can_attempt_at(now) {
            return None;
        }
        let retry_after = inner.ledger.retry_after_at(now).unwrap_or_default();
        Some(LifecycleError::RateLimited { retry_after })
    }

    /// Surface a denial that is returned to the caller.
    fn deny(&self, inner: &mut Inner, err: LifecycleError) -> LifecycleError {
        warn!(identity = %self.identity, error = %err, "refresh denied by attempt rate limit");
        inner.last_error = Some(err.to_string());
        self.publish(inner);
        err
    }

    /// `Valid -> ExpiringSoon` once the token enters the proactive window.
    fn reevaluate(&self, inner: &mut Inner) {
        if inner.state != TokenState::Valid {
            return;
        }
        let expiring = inner
            .credential
            .as_ref()
            .is_some_and(|c| c.expires_within(self.config.proactive_window()));
        if expiring {
            self.transition(inner, TokenState::ExpiringSoon);
        }
    }

    fn expiry_state(&self, credential: &Credential) -> TokenState {
        if credential.expires_within(self.config.proactive_window()) {
            TokenState::ExpiringSoon
        } else {
            TokenState::Valid
        }
    }

    fn transition(&self, inner: &mut Inner, to: TokenState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        debug!(identity = %self.identity, %from, %to, "token state transition");

        // No subscribers is fine.
        let _ = self.transitions_tx.send(StateTransition {
            from,
            to,
            at: Utc::now(),
        });
        self.publish(inner);
    }

    fn publish(&self, inner: &Inner) {
        self.status_tx.send_replace(self.build_status(inner));
    }

    fn build_status(&self, inner: &Inner) -> ConnectionStatus {
        let now = Utc::now();
        let is_connected = inner.state.holds_credential();
        let credential = inner.credential.as_ref().filter(|_| is_connected);

        let access_token = match (inner.state, credential) {
            (TokenState::TransientlyDegraded, Some(_)) if !self.config.expose_stale_token => None,
            (_, Some(c)) => Some(c.access_token.clone()),
            (_, None) => None,
        };
        let is_expired = match inner.state {
            TokenState::TransientlyDegraded => true,
            _ => credential.is_some_and(|c| c.expires_at <= now),
        };

        ConnectionStatus {
            state: inner.state,
            is_connected,
            is_expired,
            access_token,
            expires_at: credential.map(|c| c.expires_at),
            last_error: inner.last_error.clone(),
            can_attempt_connection: inner.ledger.can_attempt_at(now),
            connection_attempt_count: inner.ledger.len(),
        }
    }

    fn storage_failure(&self, err: StoreError) -> LifecycleError {
        error!(identity = %self.identity, error = %err, "credential store failure");
        let err = LifecycleError::from(err);
        let mut inner = self.inner.lock();
        inner.last_error = Some(err.to_string());
        self.publish(&inner);
        err
    }

    fn not_connected(&self) -> LifecycleError {
        LifecycleError::NotConnected {
            identity: self.identity.to_string(),
        }
    }

    fn reconnect_required(&self, inner: &Inner) -> LifecycleError {
        LifecycleError::ReconnectRequired {
            message: inner
                .last_error
                .clone()
                .unwrap_or_else(|| "reconnect your account to continue".to_string()),
        }
    }
}

impl std::fmt::Debug for TokenLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenLifecycleManager")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish()
    }
}

#[async_trait]
impl TokenManager for TokenLifecycleManager {
    async fn ensure_valid_token(&self) -> Result<Secret, LifecycleError> {
        TokenLifecycleManager::ensure_valid_token(self).await
    }

    async fn force_refresh(&self) -> Result<Secret, LifecycleError> {
        TokenLifecycleManager::force_refresh(self).await
    }

    async fn disconnect(&self) -> Result<(), LifecycleError> {
        TokenLifecycleManager::disconnect(self).await
    }

    fn status(&self) -> ConnectionStatus {
        TokenLifecycleManager::status(self)
    }
}
