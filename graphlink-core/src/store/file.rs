//! JSON file credential storage.
//!
//! Credentials are kept in a single versioned JSON document keyed by
//! identity. The default location is `credentials.json` in the platform
//! data directory (`~/.local/share/graphlink` on Linux).
//!
//! This backend does not encrypt anything. Use the keyring backend or the
//! portal's own profile store outside of development.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{CredentialStore, StoreError};
use crate::model::IdentityId;
use crate::token::Credential;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileStoreData {
    /// Version of the store format (for future migrations).
    version: u32,

    credentials: BTreeMap<String, Credential>,
}

impl Default for FileStoreData {
    fn default() -> Self {
        Self {
            version: 1,
            credentials: BTreeMap::new(),
        }
    }
}

/// Disk-backed credential store.
pub struct FileStore {
    path: PathBuf,
    data: RwLock<FileStoreData>,
}

impl FileStore {
    /// Default path of the credentials file.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let dirs = directories::ProjectDirs::from("org", "graphlink", "graphlink")
            .ok_or(StoreError::DataDirUnavailable)?;
        Ok(dirs.data_dir().join("credentials.json"))
    }

    /// Open the store at a specific path.
    ///
    /// Creates parent directories if they don't exist. A missing file is
    /// treated as an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            FileStoreData::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file atomically. The temporary file is owner-only before
    /// any secret is written to it.
    fn flush(&self, data: &FileStoreData) -> Result<(), StoreError> {
        let contents = serde_json::to_vec_pretty(data)?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut file = NamedTempFile::new_in(dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(fs::Permissions::from_mode(0o600))?;
        }

        file.write_all(&contents)?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;

        Ok(())
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore").field("path", &self.path).finish()
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn load(&self, identity: &IdentityId) -> Result<Option<Credential>, StoreError> {
        Ok(self.data.read().credentials.get(identity.as_str()).cloned())
    }

    async fn save(
        &self,
        identity: &IdentityId,
        credential: &Credential,
    ) -> Result<(), StoreError> {
        let mut data = self.data.write();
        data.credentials
            .insert(identity.as_str().to_string(), credential.clone());
        self.flush(&data)
    }

    async fn clear(&self, identity: &IdentityId) -> Result<(), StoreError> {
        let mut data = self.data.write();
        if data.credentials.remove(identity.as_str()).is_some() {
            self.flush(&data)?;
        }
        Ok(())
    }
}
