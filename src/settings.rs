use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::BotConfig;

#[derive(Serialize, Deserialize, Default)]
pub struct PersistentSettings {
    pub backend_url: Option<String>,
    pub probe_timeout_secs: Option<u64>,
    pub backend_timeout_secs: Option<u64>,
}

impl PersistentSettings {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            backend_url: Some(config.backend_url.clone()),
            probe_timeout_secs: Some(config.probe_timeout.as_secs()),
            backend_timeout_secs: Some(config.backend_timeout.as_secs()),
        }
    }
}

/// `<config_dir>/wifibot/settings.json`, or `./wifibot/settings.json` when the
/// platform has no config directory.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wifibot")
        .join("settings.json")
}

pub fn load_settings(path: &Path) -> PersistentSettings {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
        Err(_) => PersistentSettings::default(),
    }
}

pub fn save_settings(path: &Path, settings: &PersistentSettings) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("Failed to create settings directory {:?}: {}", parent, e);
            return;
        }
    }
    match serde_json::to_string_pretty(settings) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                warn!("Failed to save settings to {:?}: {}", path, e);
            }
        }
        Err(e) => {
            warn!("Failed to serialize settings: {}", e);
        }
    }
}
