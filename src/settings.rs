use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

use crate::stats::{DEFAULT_SIT_LABELS, DEFAULT_SPINE_LABELS};

pub const BACKEND_URL_ENV: &str = "POSTURE_BACKEND_URL";
pub const DEBUG_ENV: &str = "POSTURE_DEBUG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelSettings {
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    /// Ask the backend for its current diagnosis after every (re)connect.
    pub resync_on_connect: bool,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            reconnect_attempts: 5,
            reconnect_delay_ms: 2000,
            resync_on_connect: true,
        }
    }
}

impl ChannelSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            max_attempts: 3,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LabelSettings {
    pub sit: Vec<String>,
    pub spine: Vec<String>,
}

impl Default for LabelSettings {
    fn default() -> Self {
        Self {
            sit: DEFAULT_SIT_LABELS.iter().map(|s| s.to_string()).collect(),
            spine: DEFAULT_SPINE_LABELS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub backend_url: String,
    pub channel: ChannelSettings,
    pub gateway: GatewaySettings,
    pub tick_interval_ms: u64,
    pub history_poll_secs: u64,
    pub labels: LabelSettings,
    /// Not persisted; set from `POSTURE_DEBUG`.
    #[serde(skip)]
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8080".into(),
            channel: ChannelSettings::default(),
            gateway: GatewaySettings::default(),
            tick_interval_ms: 1000,
            history_poll_secs: 5,
            labels: LabelSettings::default(),
            debug: false,
        }
    }
}

impl Settings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn history_poll_interval(&self) -> Duration {
        Duration::from_secs(self.history_poll_secs.max(1))
    }

    /// Applies environment overrides on top of file values.
    pub fn with_env(mut self) -> Self {
        self.apply_overrides(
            std::env::var(BACKEND_URL_ENV).ok(),
            std::env::var(DEBUG_ENV).ok(),
        );
        self
    }

    fn apply_overrides(&mut self, backend_url: Option<String>, debug: Option<String>) {
        if let Some(url) = backend_url.filter(|u| !u.trim().is_empty()) {
            self.backend_url = url.trim().trim_end_matches('/').to_string();
        }
        self.debug = debug
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<Settings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring malformed settings in {}: {err}", path.display());
                Settings::default()
            })
        } else {
            Settings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data.with_env()),
        })
    }

    pub fn get(&self) -> Settings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, settings: Settings) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    fn persist(&self, data: &Settings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        let settings = store.get();
        assert_eq!(settings.channel.reconnect_attempts, 5);
        assert_eq!(settings.labels.sit, vec!["Baik", "Buruk"]);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"channel": {"reconnectAttempts": 2}, "labels": {"sit": ["good", "bad"]}}"#,
        )
        .unwrap();

        let settings = SettingsStore::new(path).unwrap().get();
        assert_eq!(settings.channel.reconnect_attempts, 2);
        assert_eq!(settings.channel.reconnect_delay_ms, 2000);
        assert_eq!(settings.labels.sit, vec!["good", "bad"]);
        assert_eq!(settings.labels.spine.len(), 3);
        assert_eq!(settings.gateway.max_attempts, 3);
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();
        let settings = SettingsStore::new(path).unwrap().get();
        assert_eq!(settings.tick_interval_ms, 1000);
    }

    #[test]
    fn test_update_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        let mut settings = store.get();
        settings.history_poll_secs = 30;
        store.update(settings).unwrap();

        let reloaded = SettingsStore::new(path).unwrap().get();
        assert_eq!(reloaded.history_poll_secs, 30);
    }

    #[test]
    fn test_overrides() {
        let mut settings = Settings::default();
        settings.apply_overrides(Some("http://10.0.0.5:8080/".into()), Some("TRUE".into()));
        assert_eq!(settings.backend_url, "http://10.0.0.5:8080");
        assert!(settings.debug);

        settings.apply_overrides(Some("   ".into()), None);
        assert_eq!(settings.backend_url, "http://10.0.0.5:8080");
        assert!(!settings.debug);
    }
}
