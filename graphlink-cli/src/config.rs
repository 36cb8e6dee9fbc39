//! CLI configuration handling.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use graphlink_core::{
    create_store, CredentialStore, FileStore, LifecycleConfig, MemoryStore, ProviderConfig,
};
use serde::{Deserialize, Serialize};

/// Where credentials are kept between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Keyring,
    File,
    Memory,
}

/// Identity provider settings.
///
/// Defaults to the Microsoft identity platform; `auth_url`, `token_url` and
/// `scopes` override the derived values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub tenant: Option<String>,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    pub scopes: Option<Vec<String>>,
}

impl ProviderSettings {
    pub fn to_provider_config(&self) -> ProviderConfig {
        let tenant = self.tenant.as_deref().unwrap_or("common");
        let mut config = ProviderConfig::microsoft_graph(tenant, self.client_id.clone());
        if let Some(url) = &self.auth_url {
            config = config.with_auth_url(url.clone());
        }
        if let Some(url) = &self.token_url {
            config = config.with_token_url(url.clone());
        }
        if let Some(secret) = &self.client_secret {
            config = config.with_client_secret(secret.clone());
        }
        if let Some(scopes) = &self.scopes {
            config = config.with_scopes(scopes.clone());
        }
        config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Identity whose connection the commands act on.
    pub identity: String,

    pub store: StoreBackend,

    /// Credentials file for the `file` backend.
    pub credentials_path: Option<PathBuf>,

    /// Logging level.
    pub log_level: String,

    pub provider: ProviderSettings,

    pub lifecycle: LifecycleConfig,

    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: PathBuf,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            identity: "default".to_string(),
            store: StoreBackend::default(),
            credentials_path: None,
            log_level: "info".to_string(),
            provider: ProviderSettings::default(),
            lifecycle: LifecycleConfig::default(),
            config_path: PathBuf::new(),
        }
    }
}

impl CliConfig {
    /// Build the credential store selected by `store`.
    ///
    /// The keyring backend falls back to the credentials file when the OS
    /// keyring cannot persist entries.
    pub fn open_store(&self) -> Result<Arc<dyn CredentialStore>> {
        let store: Arc<dyn CredentialStore> = match self.store {
            StoreBackend::Keyring => {
                let fallback = self.credentials_path()?;
                create_store(true, Some(&fallback))
            }
            StoreBackend::File => {
                let path = self.credentials_path()?;
                Arc::new(
                    FileStore::open(&path)
                        .with_context(|| format!("Failed to open credentials file {:?}", path))?,
                )
            }
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(store)
    }

    fn credentials_path(&self) -> Result<PathBuf> {
        match &self.credentials_path {
            Some(path) => Ok(path.clone()),
            None => Ok(FileStore::default_path()?),
        }
    }
}

/// Load configuration from `path`, or from the default location.
///
/// A missing default file yields defaults; a missing explicit file is an error.
pub fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let (config_path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (default_config_path(), false),
    };

    let mut config = if config_path.exists() || required {
        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", config_path))?
    } else {
        CliConfig::default()
    };

    config.config_path = config_path;
    config
        .lifecycle
        .validate()
        .with_context(|| format!("Invalid lifecycle settings in {:?}", config.config_path))?;

    Ok(config)
}

fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("graphlink.toml"))
        .unwrap_or_else(|| PathBuf::from("graphlink.toml"))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "graphlink", "graphlink")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(contents: &str) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graphlink.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_full_config() {
        let (_dir, path) = write_config(
            r#"
identity = "alice@contoso.com"
store = "file"
credentials_path = "/tmp/graphlink-credentials.json"
log_level = "debug"

[provider]
tenant = "contoso.onmicrosoft.com"
client_id = "00000000-0000-0000-0000-000000000000"

[lifecycle]
proactive_window_secs = 300

[lifecycle.retry]
max_attempts = 3
"#,
        );

        let config = load_config(Some(&path)).unwrap();

        assert_eq!(config.identity, "alice@contoso.com");
        assert_eq!(config.store, StoreBackend::File);
        assert_eq!(config.lifecycle.proactive_window_secs, 300);
        assert_eq!(config.lifecycle.retry.max_attempts, 3);
        assert_eq!(config.lifecycle.retry.base_delay_ms, 2000);
        assert_eq!(config.config_path, path);

        let provider = config.provider.to_provider_config();
        assert!(provider.token_url.contains("contoso.onmicrosoft.com"));
        assert!(provider.validate().is_ok());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let (_dir, path) = write_config("");
        let config = load_config(Some(&path)).unwrap();

        assert_eq!(config.identity, "default");
        assert_eq!(config.store, StoreBackend::Keyring);
        assert_eq!(config.lifecycle.refresh_interval_secs, 900);
        assert!(config.provider.to_provider_config().token_url.contains("/common/"));
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_invalid_lifecycle_rejected() {
        let (_dir, path) = write_config(
            r#"
[lifecycle.ledger]
capacity = 1
"#,
        );
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_provider_overrides() {
        let settings = ProviderSettings {
            client_id: "id".into(),
            token_url: Some("http://127.0.0.1:9000/token".into()),
            scopes: Some(vec!["custom".into()]),
            ..Default::default()
        };
        let provider = settings.to_provider_config();

        assert_eq!(provider.token_url, "http://127.0.0.1:9000/token");
        assert_eq!(provider.scopes, vec!["custom"]);
    }

    #[tokio::test]
    async fn test_keyring_backend_persists_credentials() {
        use chrono::{Duration, Utc};
        use graphlink_core::{Credential, IdentityId};

        let dir = TempDir::new().unwrap();
        let config = CliConfig {
            store: StoreBackend::Keyring,
            credentials_path: Some(dir.path().join("credentials.json")),
            ..CliConfig::default()
        };
        let identity = IdentityId::new(format!(
            "cli-test-{}",
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let credential = Credential::new("a1", Some("r1"), Utc::now() + Duration::hours(1));

        config.open_store().unwrap().save(&identity, &credential).await.unwrap();

        // Whichever backend was picked, a freshly opened store sees the credential.
        let reopened = config.open_store().unwrap();
        let loaded = reopened.load(&identity).await.unwrap();
        let _ = reopened.clear(&identity).await;
        assert_eq!(loaded.unwrap().access_token.expose(), "a1");
    }

    #[test]
    fn test_file_store_backend() {
        let dir = TempDir::new().unwrap();
        let config = CliConfig {
            store: StoreBackend::File,
            credentials_path: Some(dir.path().join("credentials.json")),
            ..CliConfig::default()
        };
        assert!(config.open_store().is_ok());
    }
}
