//! Sync configuration stored as a TOML file.
//!
//! Only non-secret settings live here. Credentials are kept in the
//! [`SecureStore`].

use crate::crypto::SecureBuffer;
use crate::store::{SecureStore, StoreKey};
use crate::sync::models::SyncStatus;
use crate::{Result, VaultError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_REMOTE_PATH: &str = "/vaultkeep/";
pub const DEFAULT_INTERVAL_MINUTES: u64 = 15;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
const HTTPS_SCHEME: &str = "https://";

/// Which directions a plain `sync()` is allowed to move data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Two-way sync, also run by the background scheduler
    Auto,
    /// Two-way sync on request only
    #[default]
    Manual,
    UploadOnly,
    DownloadOnly,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::UploadOnly => "upload_only",
            Self::DownloadOnly => "download_only",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::Auto),
            "manual" => Some(Self::Manual),
            "upload_only" | "upload" => Some(Self::UploadOnly),
            "download_only" | "download" => Some(Self::DownloadOnly),
            _ => None,
        }
    }
}

/// Sync configuration for this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub server_url: Option<String>,
    pub remote_path: String,
    pub mode: SyncMode,
    pub auto_sync_interval_minutes: u64,
    pub enabled: bool,
    pub compress: bool,
    pub timeout_secs: u64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_status: Option<SyncStatus>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            remote_path: DEFAULT_REMOTE_PATH.to_string(),
            mode: SyncMode::default(),
            auto_sync_interval_minutes: DEFAULT_INTERVAL_MINUTES,
            enabled: false,
            compress: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            last_sync_at: None,
            last_sync_status: None,
        }
    }
}

impl SyncConfig {
    /// Load config from a TOML file. Returns default if the file is missing.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No sync config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| VaultError::Configuration(format!("Invalid config {:?}: {}", path, e)))
    }

    /// Write config as TOML, creating the parent directory if needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| VaultError::Serialization(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check that the config describes a usable remote
    pub fn validate(&self) -> Result<()> {
        let url = self
            .server_url
            .as_deref()
            .ok_or_else(|| VaultError::Configuration("No server URL set".to_string()))?;

        let has_https_scheme = url
            .get(..HTTPS_SCHEME.len())
            .map_or(false, |scheme| scheme.eq_ignore_ascii_case(HTTPS_SCHEME));
        if !has_https_scheme {
            return Err(VaultError::Configuration(
                "Server URL must use https://".to_string(),
            ));
        }
        if url.len() <= HTTPS_SCHEME.len() {
            return Err(VaultError::Configuration("Server URL has no host".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(VaultError::Configuration(
                "Network timeout must be at least 1 second".to_string(),
            ));
        }
        if self.auto_sync_interval_minutes == 0 {
            return Err(VaultError::Configuration(
                "Auto-sync interval must be at least 1 minute".to_string(),
            ));
        }
        Ok(())
    }

    /// Remote folder, normalized to `/name/`
    pub fn folder_path(&self) -> String {
        let trimmed = self.remote_path.trim_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("/{}/", trimmed)
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.auto_sync_interval_minutes.max(1) * 60)
    }

    /// Whether the background scheduler should run
    pub fn auto_sync_active(&self) -> bool {
        self.enabled && self.mode == SyncMode::Auto
    }
}

/// WebDAV credentials, read from and written to the secure store.
#[derive(Debug, Clone)]
pub struct SyncCredentials {
    pub username: String,
    pub password: SecureBuffer,
}

impl SyncCredentials {
    pub fn load(store: &dyn SecureStore) -> Result<Option<Self>> {
        let username = match store.read_string(StoreKey::SyncUsername)? {
            Some(u) => u,
            None => return Ok(None),
        };
        let password = store
            .read(StoreKey::SyncPassword)?
            .map(SecureBuffer::new)
            .ok_or_else(|| VaultError::Configuration("Sync password missing".to_string()))?;
        Ok(Some(Self { username, password }))
    }

    pub fn save(&self, store: &dyn SecureStore) -> Result<()> {
        store.write_string(StoreKey::SyncUsername, &self.username)?;
        store.write(StoreKey::SyncPassword, self.password.as_bytes())?;
        Ok(())
    }

    pub fn clear(store: &dyn SecureStore) -> Result<()> {
        store.delete(StoreKey::SyncUsername)?;
        store.delete(StoreKey::SyncPassword)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn default_config() {
        let config = SyncConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.remote_path, "/vaultkeep/");
        assert_eq!(config.mode, SyncMode::Manual);
        assert_eq!(config.auto_sync_interval_minutes, 15);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.last_sync_at.is_none());
    }

    #[test]
    fn http_urls_rejected() {
        let mut config = SyncConfig::default();
        assert!(matches!(config.validate(), Err(VaultError::Configuration(_))));

        config.server_url = Some("http://dav.example.com".to_string());
        assert!(matches!(config.validate(), Err(VaultError::Configuration(_))));

        config.server_url = Some("https://dav.example.com".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn scheme_check_ignores_case() {
        let mut config = SyncConfig::default();
        for url in ["HTTPS://dav.example.com", "Https://dav.example.com"] {
            config.server_url = Some(url.to_string());
            assert!(config.validate().is_ok(), "{} should be accepted", url);
        }

        for url in ["HTTP://dav.example.com", "HTTPS://", "ftp://x"] {
            config.server_url = Some(url.to_string());
            assert!(matches!(config.validate(), Err(VaultError::Configuration(_))));
        }
    }

    #[test]
    fn folder_path_normalized() {
        let mut config = SyncConfig::default();
        for (input, expected) in [
            ("vaultkeep", "/vaultkeep/"),
            ("/vaultkeep", "/vaultkeep/"),
            ("/a/b/", "/a/b/"),
            ("", "/"),
        ] {
            config.remote_path = input.to_string();
            assert_eq!(config.folder_path(), expected);
        }
    }

    #[test]
    fn save_and_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sync.toml");

        assert_eq!(SyncConfig::load(&path).unwrap(), SyncConfig::default());

        let config = SyncConfig {
            server_url: Some("https://dav.example.com".to_string()),
            mode: SyncMode::Auto,
            enabled: true,
            last_sync_at: Some(Utc::now()),
            last_sync_status: Some(SyncStatus::Success),
            ..SyncConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = SyncConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.auto_sync_active());

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("mode = \"auto\""));
    }

    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");
        std::fs::write(&path, "server_url = \"https://dav.example.com\"\n").unwrap();

        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.remote_path, "/vaultkeep/");
    }

    #[test]
    fn credentials_roundtrip() {
        let store = MemoryStore::new();
        assert!(SyncCredentials::load(&store).unwrap().is_none());

        SyncCredentials {
            username: "alice".to_string(),
            password: SecureBuffer::from("dav-secret"),
        }
        .save(&store)
        .unwrap();

        let loaded = SyncCredentials::load(&store).unwrap().unwrap();
        assert_eq!(loaded.username, "alice");
        assert_eq!(loaded.password.as_str(), Some("dav-secret"));

        SyncCredentials::clear(&store).unwrap();
        assert!(SyncCredentials::load(&store).unwrap().is_none());
    }
}
