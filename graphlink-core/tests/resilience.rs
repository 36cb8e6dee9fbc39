//! Integration tests for the retry-with-reauthentication wrapper.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use common::{credential, harness, ScriptedProvider};
use graphlink_core::{
    fetch_transcript, with_resilience, ConnectionStatus, ErrorKind, LifecycleError,
    OperationError, Outcome, ResilienceOptions, ResilientOperation, RetryPolicy, Secret,
    TokenManager, TokenState, TranscriptLookup,
};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Hands out `token-1`, `token-2`, ... on every ensure call.
#[derive(Default)]
struct FakeManager {
    ensures: AtomicUsize,
    fail_ensure: AtomicBool,
    stale: Option<&'static str>,
}

impl FakeManager {
    fn ensures(&self) -> usize {
        self.ensures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenManager for FakeManager {
    async fn ensure_valid_token(&self) -> Result<Secret, LifecycleError> {
        let n = self.ensures.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_ensure.load(Ordering::SeqCst) {
            return Err(LifecycleError::Transient {
                message: "provider down".into(),
            });
        }
        Ok(Secret::new(format!("token-{n}")))
    }

    async fn force_refresh(&self) -> Result<Secret, LifecycleError> {
        self.ensure_valid_token().await
    }

    async fn disconnect(&self) -> Result<(), LifecycleError> {
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        let mut status = ConnectionStatus::disconnected();
        if let Some(stale) = self.stale {
            status.state = TokenState::TransientlyDegraded;
            status.is_connected = true;
            status.is_expired = true;
            status.access_token = Some(Secret::new(stale));
        }
        status
    }
}

/// Records the token and the virtual time of every call.
#[derive(Default)]
struct CallLog {
    calls: Mutex<Vec<(String, Instant)>>,
}

impl CallLog {
    fn record(&self, token: &Secret) -> usize {
        let mut calls = self.calls.lock();
        calls.push((token.expose().to_string(), Instant::now()));
        calls.len()
    }

    fn count(&self) -> usize {
        self.calls.lock().len()
    }

    fn tokens(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(t, _)| t.clone()).collect()
    }

    fn gaps_ms(&self) -> Vec<u64> {
        let calls = self.calls.lock();
        calls
            .windows(2)
            .map(|w| (w[1].1 - w[0].1).as_millis() as u64)
            .collect()
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_exhaust_attempts_with_backoff() {
    let manager = FakeManager::default();
    let log = CallLog::default();

    let outcome = ResilientOperation::new(&manager)
        .run(|token| {
            let n = log.record(&token);
            async move { Err::<(), _>(OperationError::new(format!("503 on attempt {n}")).with_status(503)) }
        })
        .await;

    assert_eq!(log.count(), 5);
    match outcome {
        Outcome::Failure(err) => {
            assert_eq!(err.message, "503 on attempt 5");
            assert_eq!(err.status, Some(503));
            assert_eq!(err.kind, ErrorKind::Retryable);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let expected = [2000u64, 3000, 4500, 6750];
    for (gap, want) in log.gaps_ms().into_iter().zip(expected) {
        assert!(gap.abs_diff(want) <= 5, "gap {gap}ms, expected {want}ms");
    }

    // Only the initial token request; no auth failures were reported.
    assert_eq!(manager.ensures(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_success_returns_immediately() {
    let manager = FakeManager::default();
    let log = CallLog::default();
    let start = Instant::now();

    let outcome = ResilientOperation::new(&manager)
        .run(|token| {
            log.record(&token);
            async { Ok::<_, OperationError>("sent") }
        })
        .await;

    assert_eq!(outcome, Outcome::Success("sent"));
    assert_eq!(log.count(), 1);
    assert!(start.elapsed() < Duration::from_millis(1));
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_triggers_single_reauthentication() {
    let manager = FakeManager::default();
    let log = CallLog::default();

    let outcome = ResilientOperation::new(&manager)
        .run(|token| {
            let n = log.record(&token);
            async move {
                match n {
                    1 => Err(OperationError::new("Service Unavailable").with_status(503)),
                    2 => Err(OperationError::new("Unauthorized").with_status(401)),
                    _ => Ok(n),
                }
            }
        })
        .await;

    assert_eq!(outcome, Outcome::Success(3));
    // Initial token, then exactly one reauthentication before attempt 3.
    assert_eq!(manager.ensures(), 2);
    assert_eq!(log.tokens(), vec!["token-1", "token-1", "token-2"]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_reauthentication_retries_with_current_token() {
    let manager = FakeManager::default();
    let log = CallLog::default();

    let outcome = ResilientOperation::new(&manager)
        .run(|token| {
            let n = log.record(&token);
            if n == 1 {
                manager.fail_ensure.store(true, Ordering::SeqCst);
            }
            async move {
                match n {
                    1 => Err(OperationError::new("Access token has expired")),
                    _ => Ok(()),
                }
            }
        })
        .await;

    assert!(outcome.is_success());
    assert_eq!(manager.ensures(), 2);
    assert_eq!(log.tokens(), vec!["token-1", "token-1"]);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_is_not_retried() {
    let manager = FakeManager::default();
    let log = CallLog::default();

    let outcome = ResilientOperation::new(&manager)
        .run(|token| {
            log.record(&token);
            async { Err::<(), _>(OperationError::fatal("recipient address is malformed").with_status(400)) }
        })
        .await;

    assert_eq!(log.count(), 1);
    assert!(matches!(outcome, Outcome::Failure(OperationError { kind: ErrorKind::Fatal, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_falls_back_to_stale_token() {
    let manager = FakeManager {
        stale: Some("stale-token"),
        ..Default::default()
    };
    manager.fail_ensure.store(true, Ordering::SeqCst);
    let log = CallLog::default();

    let outcome = ResilientOperation::new(&manager)
        .run(|token| {
            log.record(&token);
            async { Ok::<_, OperationError>(()) }
        })
        .await;

    assert!(outcome.is_success());
    assert_eq!(log.tokens(), vec!["stale-token"]);
}

#[tokio::test(start_paused = true)]
async fn test_no_token_at_all_fails_without_calling() {
    let manager = FakeManager::default();
    manager.fail_ensure.store(true, Ordering::SeqCst);
    let log = CallLog::default();

    let outcome = ResilientOperation::new(&manager)
        .run(|token| {
            log.record(&token);
            async { Ok::<_, OperationError>(()) }
        })
        .await;

    assert_eq!(log.count(), 0);
    match outcome {
        Outcome::Failure(err) => assert!(err.message.contains("provider down")),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_custom_auth_failure_hook() {
    let manager = FakeManager::default();
    let log = CallLog::default();
    let options = ResilienceOptions::default()
        .with_auth_failure(|err: &OperationError| err.message.contains("InvalidAuthenticationToken"));

    let outcome = with_resilience(
        &manager,
        |token| {
            let n = log.record(&token);
            async move {
                match n {
                    1 => Err(OperationError::new("InvalidAuthenticationToken").with_status(403)),
                    _ => Ok(()),
                }
            }
        },
        options,
    )
    .await;

    assert!(outcome.is_success());
    assert_eq!(manager.ensures(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_custom_policy_attempt_ceiling() {
    let manager = FakeManager::default();
    let log = CallLog::default();
    let policy = RetryPolicy {
        max_attempts: 2,
        base_delay_ms: 100,
        multiplier: 2.0,
    };

    let outcome = ResilientOperation::with_options(&manager, ResilienceOptions::default().with_policy(policy))
        .run(|token| {
            log.record(&token);
            async { Err::<(), _>(OperationError::new("timeout")) }
        })
        .await;

    assert!(matches!(outcome, Outcome::Failure(_)));
    assert_eq!(log.count(), 2);
    assert_eq!(log.gaps_ms(), vec![100]);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_further_attempts() {
    let manager = FakeManager::default();
    let log = CallLog::default();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });

    let outcome = ResilientOperation::with_options(
        &manager,
        ResilienceOptions::default().with_cancellation(cancel),
    )
    .run(|token| {
        log.record(&token);
        async { Err::<(), _>(OperationError::new("timeout").with_status(504)) }
    })
    .await;

    assert_eq!(log.count(), 1);
    match outcome {
        Outcome::Failure(err) => {
            assert_eq!(err.kind, ErrorKind::Cancelled);
            assert!(err.message.contains("timeout"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_processing_transcript_is_pending_after_single_pass() {
    let manager = FakeManager::default();
    let log = CallLog::default();
    let operation = ResilientOperation::new(&manager);

    let outcome = fetch_transcript(&operation, |token| {
        log.record(&token);
        async {
            Ok(TranscriptLookup {
                recording_found: true,
                ..Default::default()
            })
        }
    })
    .await;

    assert_eq!(outcome, Outcome::ProcessingPending);
    assert_eq!(log.count(), 1);
}

#[tokio::test]
async fn test_lifecycle_manager_backs_dependent_calls() {
    let h = harness(
        Some(credential("graph-token", ChronoDuration::hours(1))),
        ScriptedProvider::default(),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));

    let outcome = ResilientOperation::new(h.manager.as_ref())
        .run(|token| {
            seen.lock().push(token.expose().to_string());
            async { Ok::<_, OperationError>(()) }
        })
        .await;

    assert!(outcome.is_success());
    assert_eq!(seen.lock().as_slice(), &["graph-token".to_string()]);
    assert_eq!(h.provider.calls(), 0);
}
