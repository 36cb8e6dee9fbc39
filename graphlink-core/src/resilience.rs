//! Retry with reauthentication for calls that need an access token.
//!
//! This module provides:
//! - [`RetryPolicy`] - Attempt ceiling and exponential backoff
//! - [`ResilientOperation`] - Runs a dependent call under a policy
//! - [`Outcome`] - Typed result of a dependent call
//! - [`OperationError`] - Failure reported by a dependent call
//!
//! A dependent feature supplies only the call itself and, optionally, a hook
//! deciding what counts as an authorization failure. Backoff arithmetic and
//! token handling stay here.
//!
//! # Example
//!
//! ```rust,ignore
//! use graphlink_core::resilience::{ResilientOperation, OperationError};
//!
//! let outcome = ResilientOperation::new(&manager)
//!     .run(|token| async move {
//!         send_mail(token.expose(), &message).await.map_err(OperationError::from)
//!     })
//!     .await;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::classify::ErrorClassifier;
use crate::config::ConfigError;
use crate::store::Secret;
use crate::token::{LifecycleError, TokenManager};

/// Attempt ceiling and backoff for dependent calls.
///
/// The delay before attempt `k` (1-based) is zero for `k = 1` and
/// `base_delay_ms * multiplier^(k-2)` afterwards. No cap other than
/// `max_attempts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 2000,
            multiplier: 1.5,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before the given 1-based attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2) as i32;
        let millis = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(millis.round() as u64)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                message: "must be at least 1".to_string(),
            });
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field: "retry.multiplier",
                message: format!("must be a finite value >= 1.0, got {}", self.multiplier),
            });
        }
        Ok(())
    }
}

/// Whether a failed attempt may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Worth another attempt after backoff.
    Retryable,
    /// Surfaced immediately.
    Fatal,
    /// The caller abandoned the operation.
    Cancelled,
}

/// Failure reported by a dependent call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct OperationError {
    /// HTTP status of the dependent call, when it got that far.
    pub status: Option<u16>,
    pub message: String,
    pub kind: ErrorKind,
}

impl OperationError {
    /// A retryable failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            kind: ErrorKind::Retryable,
        }
    }

    /// A failure that must not be retried, such as a malformed request.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Fatal,
            ..Self::new(message)
        }
    }

    pub fn cancelled(last_error: Option<&OperationError>) -> Self {
        let message = match last_error {
            Some(err) => format!("operation cancelled, last error: {}", err),
            None => "operation cancelled".to_string(),
        };
        Self {
            status: last_error.and_then(|e| e.status),
            message,
            kind: ErrorKind::Cancelled,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Retryable
    }

    /// HTTP 401, or a message mentioning an unauthorized or expired token.
    pub fn is_auth_failure(&self) -> bool {
        ErrorClassifier::looks_like_auth_failure(self.status, &self.message)
    }
}

impl From<LifecycleError> for OperationError {
    fn from(err: LifecycleError) -> Self {
        Self::fatal(err.to_string())
    }
}

/// Result of a dependent call after response classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The call produced its payload.
    Success(T),

    /// The resource exists but the provider is still preparing it.
    ProcessingPending,

    /// Something was found but the content could not be extracted.
    PartialMatch { detail: String },

    /// Nothing matched.
    NotFound,

    Failure(OperationError),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Success(value) => Outcome::Success(f(value)),
            Self::ProcessingPending => Outcome::ProcessingPending,
            Self::PartialMatch { detail } => Outcome::PartialMatch { detail },
            Self::NotFound => Outcome::NotFound,
            Self::Failure(err) => Outcome::Failure(err),
        }
    }

    /// Payload on success, `None` for every other outcome.
    pub fn success(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }
}

/// Progress of one dependent call. Never outlives it.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// 1-based number of the attempt about to run or just run.
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_error: Option<OperationError>,
}

impl RetryContext {
    fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            last_error: None,
        }
    }

    fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Decides whether a failed attempt was rejected for authorization.
pub type AuthFailureHook = Arc<dyn Fn(&OperationError) -> bool + Send + Sync>;

/// Per-call options for [`ResilientOperation`].
#[derive(Clone, Default)]
pub struct ResilienceOptions {
    pub policy: RetryPolicy,

    /// Overrides [`OperationError::is_auth_failure`].
    pub auth_failure: Option<AuthFailureHook>,

    /// Stops scheduling further attempts once cancelled.
    pub cancel: Option<CancellationToken>,
}

impl ResilienceOptions {
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_auth_failure(
        mut self,
        hook: impl Fn(&OperationError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.auth_failure = Some(Arc::new(hook));
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl fmt::Debug for ResilienceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilienceOptions")
            .field("policy", &self.policy)
            .field("auth_failure", &self.auth_failure.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

/// Runs a dependent call with backoff, reauthenticating after auth failures.
///
/// Holds no state across calls to [`run`](Self::run).
pub struct ResilientOperation<'a, M: TokenManager + ?Sized> {
    manager: &'a M,
    options: ResilienceOptions,
}

impl<'a, M: TokenManager + ?Sized> ResilientOperation<'a, M> {
    pub fn new(manager: &'a M) -> Self {
        Self::with_options(manager, ResilienceOptions::default())
    }

    pub fn with_options(manager: &'a M, options: ResilienceOptions) -> Self {
        Self { manager, options }
    }

    pub fn options(&self) -> &ResilienceOptions {
        &self.options
    }

    /// Run the call; every successful payload is reported as [`Outcome::Success`].
    pub async fn run<T, F, Fut>(&self, call: F) -> Outcome<T>
    where
        F: FnMut(Secret) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        self.run_classified(call, Outcome::Success).await
    }

    /// Run the call, then interpret its payload with `classify`.
    ///
    /// Classification happens once, on the first successful payload. A
    /// non-success classification is a final answer, not a retry trigger.
    pub async fn run_classified<T, U, F, Fut, C>(&self, call: F, classify: C) -> Outcome<U>
    where
        F: FnMut(Secret) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
        C: FnOnce(T) -> Outcome<U>,
    {
        match self.execute(call).await {
            Ok(payload) => classify(payload),
            Err(err) => Outcome::Failure(err),
        }
    }

    /// Retry loop. The last attempt's error is returned unchanged.
    pub async fn execute<T, F, Fut>(&self, mut call: F) -> Result<T, OperationError>
    where
        F: FnMut(Secret) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let policy = &self.options.policy;
        let mut ctx = RetryContext::new(policy.max_attempts.max(1));

        let mut token = self.initial_token().await?;

        loop {
            ctx.attempt += 1;

            if ctx.attempt > 1 {
                let delay = policy.delay_before(ctx.attempt);
                debug!(
                    attempt = ctx.attempt,
                    delay_ms = delay.as_millis() as u64,
                    "backing off before retry"
                );
                if !self.pause(delay).await {
                    return Err(OperationError::cancelled(ctx.last_error.as_ref()));
                }

                if ctx.last_error.as_ref().is_some_and(|e| self.is_auth_failure(e)) {
                    match self.manager.ensure_valid_token().await {
                        Ok(fresh) => token = fresh,
                        Err(err) => {
                            warn!(error = %err, "reauthentication failed, retrying with current token");
                        }
                    }
                }
            }

            if self.is_cancelled() {
                return Err(OperationError::cancelled(ctx.last_error.as_ref()));
            }

            match call(token.clone()).await {
                Ok(payload) => {
                    if ctx.attempt > 1 {
                        debug!(attempt = ctx.attempt, "dependent call succeeded after retry");
                    }
                    return Ok(payload);
                }
                Err(err) if !err.is_retryable() || ctx.exhausted() => {
                    warn!(
                        attempt = ctx.attempt,
                        max_attempts = ctx.max_attempts,
                        error = %err,
                        "dependent call failed"
                    );
                    return Err(err);
                }
                Err(err) => {
                    debug!(
                        attempt = ctx.attempt,
                        max_attempts = ctx.max_attempts,
                        error = %err,
                        "dependent call failed, will retry"
                    );
                    ctx.last_error = Some(err);
                }
            }
        }
    }

    /// Token for the first attempt. Falls back to the last known token when
    /// the manager cannot produce a fresh one.
    async fn initial_token(&self) -> Result<Secret, OperationError> {
        match self.manager.ensure_valid_token().await {
            Ok(token) => Ok(token),
            Err(err) => match self.manager.status().access_token {
                Some(stale) => {
                    warn!(error = %err, "using last known access token");
                    Ok(stale)
                }
                None => Err(err.into()),
            },
        }
    }

    fn is_auth_failure(&self, err: &OperationError) -> bool {
        match &self.options.auth_failure {
            Some(hook) => hook(err),
            None => err.is_auth_failure(),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.options
            .cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Sleep for `delay`; false if cancelled first.
    async fn pause(&self, delay: Duration) -> bool {
        match &self.options.cancel {
            Some(cancel) => tokio::select! {
                _ = cancel.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            },
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}

/// Run `call` under `options` on behalf of `manager`.
pub async fn with_resilience<M, T, F, Fut>(
    manager: &M,
    call: F,
    options: ResilienceOptions,
) -> Outcome<T>
where
    M: TokenManager + ?Sized,
    F: FnMut(Secret) -> Fut,
    Fut: Future<Output = Result<T, OperationError>>,
{
    ResilientOperation::with_options(manager, options)
        .run(call)
        .await
}
