//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the server location, last used username, the device id
//! sent with every login, and optional polling cadence overrides.
//!
//! Configuration is stored at `~/.config/casewatch/config.json`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::api::client::DEFAULT_BASE_URL;
use crate::models::ProviderKind;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "casewatch";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Session liveness is checked this often.
const SESSION_CHECK_SECS: u64 = 10;

/// Bot authorization can be revoked externally at any time, so it is polled often.
const BOT_POLL_SECS: u64 = 10;

/// Quota status is expensive relative to how fast it changes.
const QUOTA_POLL_SECS: u64 = 300;

/// Upper bound for any single server call.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub base_url: Option<String>,
    pub last_username: Option<String>,
    pub device_id: Option<String>,
    #[serde(default)]
    pub remember_session: bool,
    pub session_check_secs: Option<u64>,
    pub bot_poll_secs: Option<u64>,
    pub quota_poll_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir().ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    /// Device id for this installation, generated on first use.
    ///
    /// Returns true as the second value when a new id was generated and the
    /// config should be saved.
    pub fn ensure_device_id(&mut self) -> (&str, bool) {
        let created = self.device_id.is_none();
        let id = self.device_id.get_or_insert_with(|| {
            let value: u64 = rand::thread_rng().gen();
            format!("{:016x}", value)
        });
        (id.as_str(), created)
    }

    /// Descriptor sent with login so the server can name this device in conflicts
    pub fn device_descriptor(&self) -> String {
        format!(
            "{}/{} ({}; {})",
            APP_NAME,
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            self.device_id.as_deref().unwrap_or("unregistered")
        )
    }

    /// Resolve cadences and timeouts, falling back to the defaults
    pub fn sync_config(&self) -> SyncConfig {
        let defaults = SyncConfig::default();
        SyncConfig {
            session_check_interval: self
                .session_check_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_check_interval),
            bot_poll_interval: self
                .bot_poll_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.bot_poll_interval),
            quota_poll_interval: self
                .quota_poll_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.quota_poll_interval),
            request_timeout: self
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        }
    }
}

/// Timer cadences and request bounds for the synchronization core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub session_check_interval: Duration,
    pub bot_poll_interval: Duration,
    pub quota_poll_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            session_check_interval: Duration::from_secs(SESSION_CHECK_SECS),
            bot_poll_interval: Duration::from_secs(BOT_POLL_SECS),
            quota_poll_interval: Duration::from_secs(QUOTA_POLL_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self, provider: ProviderKind) -> Duration {
        match provider {
            ProviderKind::Bot => self.bot_poll_interval,
            ProviderKind::Quota => self.quota_poll_interval,
        }
    }
}
