//! Application configuration
//!
//! Read from `config.yaml` in the user's config directory, with environment
//! variables taking precedence over the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::AppError;

pub const APP_DIR: &str = "bat-survey";
pub const CONFIG_FILE: &str = "config.yaml";
pub const STORE_FILE: &str = "bats.db";

pub const ENV_STORE: &str = "BAT_SURVEY_STORE";
pub const ENV_LOG: &str = "BAT_SURVEY_LOG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store_path: PathBuf,
    pub log_level: String,
    /// Rebuild derived species links every time a store is opened.
    pub repair_on_open: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            log_level: "info".to_string(),
            repair_on_open: false,
        }
    }
}

fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join(STORE_FILE)
}

/// Where the config file is looked for when no path is given.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

impl Config {
    /// Load from `path`, or the default location when `None`. A missing file
    /// yields the defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path(),
        };

        let mut config = match path {
            Some(ref p) if p.exists() => {
                let content = std::fs::read_to_string(p)?;
                let config = Self::from_yaml(&content)
                    .map_err(|e| AppError::Config(format!("{}: {}", p.display(), e)))?;
                log::info!("Loaded config from {}", p.display());
                config
            }
            _ => {
                log::info!("No config file found, using defaults");
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, AppError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply environment overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(store) = lookup(ENV_STORE).filter(|v| !v.trim().is_empty()) {
            log::info!("Store path overridden by {}", ENV_STORE);
            self.store_path = PathBuf::from(store.trim());
        }
        if let Some(level) = lookup(ENV_LOG).filter(|v| !v.trim().is_empty()) {
            self.log_level = level.trim().to_string();
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }
}
