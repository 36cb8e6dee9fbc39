//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use graphlink_core::{
    Credential, CredentialStore, IdentityId, IdentityProvider, LifecycleConfig, MemoryStore,
    ProviderError, Secret, StoreError, TokenGrant, TokenLifecycleManager,
};
use parking_lot::Mutex;

/// Memory store that records which identities were cleared.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    pub cleared: Mutex<Vec<IdentityId>>,
    pub saves: AtomicUsize,
}

impl RecordingStore {
    pub fn with_credential(identity: IdentityId, credential: Credential) -> Self {
        Self {
            inner: MemoryStore::with_credential(identity, credential),
            ..Default::default()
        }
    }

    pub fn clear_count(&self) -> usize {
        self.cleared.lock().len()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for RecordingStore {
    async fn load(&self, identity: &IdentityId) -> Result<Option<Credential>, StoreError> {
        self.inner.load(identity).await
    }

    async fn save(&self, identity: &IdentityId, credential: &Credential) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(identity, credential).await
    }

    async fn clear(&self, identity: &IdentityId) -> Result<(), StoreError> {
        self.cleared.lock().push(identity.clone());
        self.inner.clear(identity).await
    }
}

/// Provider that replays scripted responses in order.
#[derive(Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<TokenGrant, ProviderError>>>,
    calls: AtomicUsize,
    latency: Duration,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Result<TokenGrant, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Default::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for ScriptedProvider {
    async fn refresh(&self, _refresh_token: &Secret) -> Result<TokenGrant, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::new("no scripted response left")))
    }
}

pub fn grant(access_token: &str, lifetime: chrono::Duration) -> Result<TokenGrant, ProviderError> {
    Ok(TokenGrant {
        access_token: Secret::new(access_token),
        refresh_token: None,
        expires_at: Utc::now() + lifetime,
    })
}

pub fn credential(access_token: &str, expires_in: chrono::Duration) -> Credential {
    Credential::new(access_token, Some("refresh-1"), Utc::now() + expires_in)
}

pub struct Harness {
    pub identity: IdentityId,
    pub store: Arc<RecordingStore>,
    pub provider: Arc<ScriptedProvider>,
    pub manager: Arc<TokenLifecycleManager>,
}

pub fn harness(initial: Option<Credential>, provider: ScriptedProvider) -> Harness {
    harness_with_config(initial, provider, LifecycleConfig::default())
}

pub fn harness_with_config(
    initial: Option<Credential>,
    provider: ScriptedProvider,
    config: LifecycleConfig,
) -> Harness {
    let identity = IdentityId::new("alice@example.org");
    let store = Arc::new(match initial {
        Some(c) => RecordingStore::with_credential(identity.clone(), c),
        None => RecordingStore::default(),
    });
    let provider = Arc::new(provider);
    let manager = Arc::new(TokenLifecycleManager::new(
        identity.clone(),
        store.clone(),
        provider.clone(),
        config,
    ));

    Harness {
        identity,
        store,
        provider,
        manager,
    }
}
