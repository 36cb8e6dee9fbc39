//! In-memory credential storage implementation.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{CredentialStore, StoreError};
use crate::model::IdentityId;
use crate::token::Credential;

/// In-memory credential store for testing and development.
///
/// This store is not persistent; data is lost when the process exits.
pub struct MemoryStore {
    data: RwLock<HashMap<IdentityId, Credential>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Create a memory store holding one credential.
    pub fn with_credential(identity: IdentityId, credential: Credential) -> Self {
        let mut data = HashMap::new();
        data.insert(identity, credential);
        Self {
            data: RwLock::new(data),
        }
    }

    /// Number of stored credentials.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("identities", &self.len())
            .finish()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load(&self, identity: &IdentityId) -> Result<Option<Credential>, StoreError> {
        Ok(self.data.read().get(identity).cloned())
    }

    async fn save(
        &self,
        identity: &IdentityId,
        credential: &Credential,
    ) -> Result<(), StoreError> {
        self.data
            .write()
            .insert(identity.clone(), credential.clone());
        Ok(())
    }

    async fn clear(&self, identity: &IdentityId) -> Result<(), StoreError> {
        self.data.write().remove(identity);
        Ok(())
    }
}
