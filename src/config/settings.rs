//! Top-level tool configuration
//!
//! Gating rules are flattened into the root object so the JSON file reads the
//! same as the object a host page passes in. Storage settings sit beside them.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::gating::GatingConfig;
use crate::constants::{config, storage};
use crate::error::ConfigError;

/// Record keys used by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageKeys {
    /// Explicit record key. `None` derives `hawkeye_<page path>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default = "default_toolbar_key")]
    pub toolbar: String,
}

/// Store tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSettings {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Per-operation timeout on the primary backend (disabled when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_timeout_ms: Option<u64>,
    /// Overrides the platform data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HawkeyeConfig {
    #[serde(flatten)]
    pub gating: GatingConfig,
    #[serde(default)]
    pub storage_keys: StorageKeys,
    #[serde(default)]
    pub storage: StorageSettings,
}

fn default_toolbar_key() -> String {
    storage::TOOLBAR_KEY.to_string()
}

fn default_debounce_ms() -> u64 {
    storage::DEBOUNCE_MS
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            state: None,
            toolbar: default_toolbar_key(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            operation_timeout_ms: None,
            data_dir: None,
        }
    }
}

impl Default for HawkeyeConfig {
    fn default() -> Self {
        Self {
            gating: GatingConfig::default(),
            storage_keys: StorageKeys::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl StorageSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }

    /// Data directory: explicit override, else `<data dir>/hawkeye`
    pub fn resolve_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        let mut path = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(config::APP_DIR);
        path
    }
}

impl HawkeyeConfig {
    pub fn path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(config::APP_DIR);
        path.push(config::FILENAME);
        path
    }

    /// Parse and validate a JSON config string
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let config: HawkeyeConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&contents)?;
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Load from the default location, falling back to defaults when no file exists
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path();
        if !path.exists() {
            warn!(path = %path.display(), "No config file found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = self.gating.validation_errors();
        if self.storage_keys.toolbar.is_empty() {
            errors.push("storageKeys.toolbar must not be empty".to_string());
        }
        if matches!(&self.storage_keys.state, Some(key) if key.is_empty()) {
            errors.push("storageKeys.state must not be empty".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}
