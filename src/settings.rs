use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::relay::RelayServerConfig;

pub const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RelaySettings {
    pub port: u16,
    pub log_dir: PathBuf,
    pub allowed_origin: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            port: 5174,
            log_dir: PathBuf::from("data").join("logs"),
            allowed_origin: "http://localhost:3000".into(),
        }
    }
}

impl RelaySettings {
    /// Applies `FLOW_LOG_PORT`, `FLOW_LOG_DIR` and `FLOW_LOG_ORIGIN`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(raw) = std::env::var("FLOW_LOG_PORT") {
            match raw.parse() {
                Ok(port) => self.port = port,
                Err(_) => warn!("Ignoring invalid FLOW_LOG_PORT '{raw}'"),
            }
        }
        if let Ok(dir) = std::env::var("FLOW_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Ok(origin) = std::env::var("FLOW_LOG_ORIGIN") {
            self.allowed_origin = origin;
        }
        self
    }

    pub fn server_config(&self) -> RelayServerConfig {
        RelayServerConfig {
            port: self.port,
            log_dir: self.log_dir.clone(),
            allowed_origin: self.allowed_origin.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UserSettings {
    /// Base URL of the log relay; `None` disables relaying.
    pub relay_url: Option<String>,
    /// Insight endpoint; `None` disables analysis.
    pub insights_url: Option<String>,
    /// Environment variable holding the insight service key.
    pub insights_api_key_env: String,
    pub snapshot_interval_secs: u64,
    pub settle_delay_ms: u64,
    pub relay: RelaySettings,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            relay_url: Some("http://localhost:5174/api/log".into()),
            insights_url: None,
            insights_api_key_env: "FLOWPOMO_INSIGHTS_KEY".into(),
            snapshot_interval_secs: 5 * 60,
            settle_delay_ms: 50,
            relay: RelaySettings::default(),
        }
    }
}

impl UserSettings {
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs.max(1))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn insights_api_key(&self) -> Option<String> {
        std::env::var(&self.insights_api_key_env).ok()
    }
}

/// Edits requested from the command line. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsChange {
    pub relay_url: Option<String>,
    pub disable_relay: bool,
    pub insights_url: Option<String>,
    pub snapshot_interval_secs: Option<u64>,
}

impl SettingsChange {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(self, settings: &mut UserSettings) {
        if self.disable_relay {
            settings.relay_url = None;
        } else if let Some(url) = self.relay_url {
            settings.relay_url = Some(url);
        }
        if let Some(url) = self.insights_url {
            settings.insights_url = Some(url).filter(|url| !url.trim().is_empty());
        }
        if let Some(secs) = self.snapshot_interval_secs {
            settings.snapshot_interval_secs = secs;
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Settings file {} is malformed ({err}); using defaults",
                    path.display()
                );
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> UserSettings {
        self.read().clone()
    }

    /// Applies `change` and writes the result back to disk.
    pub fn update<F>(&self, change: F) -> Result<UserSettings>
    where
        F: FnOnce(&mut UserSettings),
    {
        let mut guard = self.write();
        change(&mut guard);
        self.persist(&guard)?;
        Ok(guard.clone())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
