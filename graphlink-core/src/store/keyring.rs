//! OS keyring-backed credential storage implementation.

use async_trait::async_trait;
use keyring::Entry;

use super::{CredentialStore, Secret, StoreError};
use crate::model::IdentityId;
use crate::token::Credential;

/// OS keyring-backed credential store.
///
/// This store uses the platform's native keyring service:
/// - macOS: Keychain
/// - Linux: Secret Service API (via libsecret)
/// - Windows: Credential Manager
///
/// Each identity maps to one entry named `{service_name}/{identity}` whose
/// password is the JSON-encoded [`Credential`].
pub struct KeyringStore {
    service_name: String,
}

impl KeyringStore {
    /// Try to create a new keyring store.
    ///
    /// Writes, reads back and deletes a marker entry. Returns
    /// [`StoreError::KeyringUnavailable`] when the backend does not hand the
    /// value back, which is also the case for the non-persistent mock store.
    pub fn try_new(service_name: &str) -> Result<Self, StoreError> {
        let unavailable = |message: String| StoreError::KeyringUnavailable { message };

        let marker = Entry::new(&format!("{}/__availability__", service_name), "availability_check")
            .map_err(|e| unavailable(format!("keyring backend not available: {}", e)))?;
        marker
            .set_password("ok")
            .map_err(|e| unavailable(format!("keyring rejected a write: {}", e)))?;

        let readback = Entry::new(&format!("{}/__availability__", service_name), "availability_check")
            .and_then(|entry| entry.get_password());
        let _ = marker.delete_credential();

        match readback {
            Ok(value) if value == "ok" => Ok(Self {
                service_name: service_name.to_string(),
            }),
            Ok(_) => Err(unavailable("keyring returned a different value".to_string())),
            Err(e) => Err(unavailable(format!("keyring does not persist entries: {}", e))),
        }
    }

    fn entry(&self, identity: &IdentityId) -> Result<Entry, StoreError> {
        let service = format!("{}/{}", self.service_name, identity);
        Entry::new(&service, "graphlink").map_err(|e| StoreError::BackendError {
            message: format!("failed to create keyring entry: {}", e),
        })
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("service_name", &self.service_name)
            .finish()
    }
}

#[async_trait]
impl CredentialStore for KeyringStore {
    async fn load(&self, identity: &IdentityId) -> Result<Option<Credential>, StoreError> {
        let entry = self.entry(identity)?;

        match entry.get_password() {
            Ok(password) => {
                let encoded = Secret::new(password);
                Ok(Some(serde_json::from_str(encoded.expose())?))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::Ambiguous(_)) => Err(StoreError::BackendError {
                message: format!("ambiguous keyring entry for identity: {}", identity),
            }),
            Err(keyring::Error::PlatformFailure(e)) => Err(StoreError::BackendError {
                message: format!("platform keyring failure: {}", e),
            }),
            Err(e) => Err(StoreError::BackendError {
                message: format!("keyring error: {}", e),
            }),
        }
    }

    async fn save(
        &self,
        identity: &IdentityId,
        credential: &Credential,
    ) -> Result<(), StoreError> {
        let entry = self.entry(identity)?;
        let encoded = Secret::new(serde_json::to_string(credential)?);

        entry
            .set_password(encoded.expose())
            .map_err(|e| StoreError::BackendError {
                message: format!("failed to set keyring password: {}", e),
            })
    }

    async fn clear(&self, identity: &IdentityId) -> Result<(), StoreError> {
        let entry = self.entry(identity)?;

        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::BackendError {
                message: format!("failed to delete keyring entry: {}", e),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    // These tests skip themselves on hosts without a working keyring. A store
    // that was created and accepted a write must hand the credential back.

    #[test]
    fn test_keyring_store_creation() {
        match KeyringStore::try_new("graphlink-test") {
            Ok(store) => assert_eq!(store.service_name, "graphlink-test"),
            Err(StoreError::KeyringUnavailable { .. }) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[tokio::test]
    async fn test_keyring_store_roundtrip() {
        let store = match KeyringStore::try_new("graphlink-test-ops") {
            Ok(s) => s,
            Err(_) => {
                eprintln!("Skipping test_keyring_store_roundtrip: keyring unavailable");
                return;
            }
        };

        let identity = IdentityId::new(format!(
            "test-{}",
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let credential = Credential::new("a1", Some("r1"), Utc::now() + Duration::hours(1));

        if let Err(e) = store.save(&identity, &credential).await {
            eprintln!("Keyring save failed ({}), skipping test", e);
            return;
        }

        let loaded = store.load(&identity).await;
        let _ = store.clear(&identity).await;

        let loaded = loaded
            .unwrap()
            .expect("credential saved to the keyring must load back");
        assert_eq!(loaded.access_token.expose(), "a1");
        assert_eq!(loaded.refresh_token.unwrap().expose(), "r1");
        assert!(store.load(&identity).await.unwrap().is_none());
    }
}
