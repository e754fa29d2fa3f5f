//! Runtime configuration.
//!
//! Layers, lowest to highest precedence: built-in defaults, `POS_*`
//! environment variables, then operator overrides persisted in the
//! `local_settings` table (category `config`), so a URL set on the device
//! survives restarts.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::api::normalize_api_url;
use crate::db;
use crate::error::StoreError;

const SETTINGS_CATEGORY: &str = "config";
const APP_DIR_NAME: &str = "pos-offline-sync";

pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_SYNC_TAG: &str = "sync-pending-orders";
pub const DEFAULT_ASSET_CACHE_VERSION: &str = "restaurant-pos-cache-v1";

/// Who may post orders directly while a session came from offline unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OfflineUnlockPolicy {
    /// Offline-unlocked sessions always queue, even when online.
    #[default]
    QueueAlways,
    /// Offline-unlocked sessions post directly whenever the device is online.
    DirectWhenOnline,
}

impl OfflineUnlockPolicy {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "queue_always" | "queue" => Some(Self::QueueAlways),
            "direct_when_online" | "direct" => Some(Self::DirectWhenOnline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the REST API, including its `/api` path.
    pub api_base_url: String,
    /// Origin the application shell assets are served from.
    pub shell_base_url: String,
    /// Requests whose path starts with this are never cached by the worker.
    pub api_path_prefix: String,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub request_timeout_secs: u64,
    pub asset_cache_version: String,
    pub asset_manifest: Vec<String>,
    pub sync_tag: String,
    pub offline_unlock_policy: OfflineUnlockPolicy,
    /// Keep the active session in the OS keyring across restarts.
    pub persist_session: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            shell_base_url: shell_origin(DEFAULT_API_URL),
            api_path_prefix: "/api/".to_string(),
            log_dir: data_dir.join("logs"),
            data_dir,
            request_timeout_secs: 30,
            asset_cache_version: DEFAULT_ASSET_CACHE_VERSION.to_string(),
            asset_manifest: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
                "/logo192.png".to_string(),
            ],
            sync_tag: DEFAULT_SYNC_TAG.to_string(),
            offline_unlock_policy: OfflineUnlockPolicy::default(),
            persist_session: true,
        }
    }
}

impl SyncConfig {
    /// Defaults overlaid with `POS_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(url) = env_value("POS_API_URL") {
            config.set_api_base_url(&url);
        }
        if let Some(url) = env_value("POS_SHELL_URL") {
            config.shell_base_url = normalize_api_url(&url);
        }
        if let Some(dir) = env_value("POS_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
            config.log_dir = config.data_dir.join("logs");
        }
        if let Some(dir) = env_value("POS_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(raw) = env_value("POS_REQUEST_TIMEOUT_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => config.request_timeout_secs = secs,
                _ => warn!(value = %raw, "ignoring invalid POS_REQUEST_TIMEOUT_SECS"),
            }
        }
        if let Some(raw) = env_value("POS_OFFLINE_UNLOCK_POLICY") {
            match OfflineUnlockPolicy::parse(&raw) {
                Some(policy) => config.offline_unlock_policy = policy,
                None => warn!(value = %raw, "ignoring invalid POS_OFFLINE_UNLOCK_POLICY"),
            }
        }

        config
    }

    /// Apply overrides persisted in `local_settings`.
    pub fn apply_local_overrides(&mut self, conn: &Connection) -> Result<(), StoreError> {
        for (key, value) in db::get_category_settings(conn, SETTINGS_CATEGORY)? {
            if !self.apply_override(&key, &value) {
                warn!(key = %key, "ignoring unknown or invalid config override");
            }
        }
        Ok(())
    }

    /// Validate, apply and persist one override.
    pub fn persist_override(
        &mut self,
        conn: &Connection,
        key: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        if !self.apply_override(key, value) {
            return Ok(false);
        }
        db::set_setting(conn, SETTINGS_CATEGORY, key, value)?;
        info!(key, "config override persisted");
        Ok(true)
    }

    fn apply_override(&mut self, key: &str, value: &str) -> bool {
        match key {
            "api_base_url" if !value.trim().is_empty() => {
                self.set_api_base_url(value);
                true
            }
            "shell_base_url" if !value.trim().is_empty() => {
                self.shell_base_url = normalize_api_url(value);
                true
            }
            "request_timeout_secs" => match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => {
                    self.request_timeout_secs = secs;
                    true
                }
                _ => false,
            },
            "offline_unlock_policy" => match OfflineUnlockPolicy::parse(value) {
                Some(policy) => {
                    self.offline_unlock_policy = policy;
                    true
                }
                None => false,
            },
            "asset_cache_version" if !value.trim().is_empty() => {
                self.asset_cache_version = value.trim().to_string();
                true
            }
            _ => false,
        }
    }

    fn set_api_base_url(&mut self, url: &str) {
        let normalized = normalize_api_url(url);
        // Keep the shell origin tied to the API unless it was set separately.
        if self.shell_base_url == shell_origin(&self.api_base_url) {
            self.shell_base_url = shell_origin(&normalized);
        }
        self.api_base_url = normalized;
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn asset_cache_path(&self) -> PathBuf {
        self.data_dir.join("asset-cache.sqlite")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(db::DB_FILE_NAME)
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `http://host:5000/api` -> `http://host:5000`.
fn shell_origin(api_url: &str) -> String {
    let normalized = normalize_api_url(api_url);
    let scheme_end = normalized.find("://").map(|i| i + 3).unwrap_or(0);
    match normalized[scheme_end..].find('/') {
        Some(path_start) => normalized[..scheme_end + path_start].to_string(),
        None => normalized,
    }
}

/// Platform data directory for this application.
pub fn default_data_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join(APP_DIR_NAME)
}
