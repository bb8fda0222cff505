//! # Manager Settings
//!
//! Serializable settings for a resource manager, layered from several
//! sources. Later sources override earlier ones field by field:
//!
//! 1. built-in defaults,
//! 2. a JSON5 settings file,
//! 3. `RESOURCES_*` environment variables.
//!
//! All durations are expressed in milliseconds.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config_manager::{
    ManagerConfig, DEFAULT_CLEANUP_DELAY, DEFAULT_CLEANUP_DELAY_ON_ERROR,
};

/// Environment variable overriding [`ManagerSettings::cleanup_delay_ms`].
pub const ENV_CLEANUP_DELAY_MS: &str = "RESOURCES_CLEANUP_DELAY_MS";
/// Environment variable overriding [`ManagerSettings::cleanup_delay_on_error_ms`].
pub const ENV_CLEANUP_DELAY_ON_ERROR_MS: &str = "RESOURCES_CLEANUP_DELAY_ON_ERROR_MS";
/// Environment variable overriding [`ManagerSettings::update_delay_ms`].
pub const ENV_UPDATE_DELAY_MS: &str = "RESOURCES_UPDATE_DELAY_MS";
/// Environment variable overriding [`ManagerSettings::log_level`].
pub const ENV_LOG_LEVEL: &str = "RESOURCES_LOG_LEVEL";

/// Errors that can occur while loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("I/O error occurred: {0}")]
    IoError(#[from] std::io::Error),

    /// The settings file is not valid JSON5 or has unexpected fields.
    #[error("Settings parse error: {0}")]
    ParseError(String),

    /// An environment variable holds a value of the wrong type.
    #[error("Environment variable {name} has an invalid value: {value}")]
    InvalidEnvVar {
        /// Variable name.
        name: String,
        /// The offending value.
        value: String,
    },
}

/// Layered manager settings. `None` means "not set by this source".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ManagerSettings {
    /// Grace period after the last release.
    pub cleanup_delay_ms: Option<u64>,
    /// Grace period and retry backoff for failed resources.
    pub cleanup_delay_on_error_ms: Option<u64>,
    /// Coalescing window for scheduled listener updates.
    pub update_delay_ms: Option<u64>,
    /// Log level used by binaries embedding the manager.
    pub log_level: Option<String>,
}

impl ManagerSettings {
    /// The built-in defaults.
    pub fn defaults() -> Self {
        Self {
            cleanup_delay_ms: Some(DEFAULT_CLEANUP_DELAY.as_millis() as u64),
            cleanup_delay_on_error_ms: Some(DEFAULT_CLEANUP_DELAY_ON_ERROR.as_millis() as u64),
            update_delay_ms: Some(100),
            log_level: Some("info".to_string()),
        }
    }

    /// Merges two settings, where `other` overrides `self` for present values.
    pub fn merge(self, other: ManagerSettings) -> ManagerSettings {
        ManagerSettings {
            cleanup_delay_ms: other.cleanup_delay_ms.or(self.cleanup_delay_ms),
            cleanup_delay_on_error_ms: other
                .cleanup_delay_on_error_ms
                .or(self.cleanup_delay_on_error_ms),
            update_delay_ms: other.update_delay_ms.or(self.update_delay_ms),
            log_level: other.log_level.or(self.log_level),
        }
    }

    /// Reads settings from a JSON5 file.
    pub fn from_file(path: &Path) -> Result<ManagerSettings, ConfigError> {
        let text = fs::read_to_string(path)?;
        json5::from_str(&text).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Reads settings from the process environment.
    pub fn from_env() -> Result<ManagerSettings, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<ManagerSettings, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis = |name: &str| -> Result<Option<u64>, ConfigError> {
            match lookup(name) {
                None => Ok(None),
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidEnvVar {
                        name: name.to_string(),
                        value: raw,
                    }),
            }
        };

        Ok(ManagerSettings {
            cleanup_delay_ms: millis(ENV_CLEANUP_DELAY_MS)?,
            cleanup_delay_on_error_ms: millis(ENV_CLEANUP_DELAY_ON_ERROR_MS)?,
            update_delay_ms: millis(ENV_UPDATE_DELAY_MS)?,
            log_level: lookup(ENV_LOG_LEVEL),
        })
    }

    /// Defaults, then `path` if given and present, then the environment.
    pub fn load(path: Option<&Path>) -> Result<ManagerSettings, ConfigError> {
        let mut settings = Self::defaults();
        if let Some(path) = path {
            if path.exists() {
                settings = settings.merge(Self::from_file(path)?);
            } else {
                log::info!(
                    "Settings file not found at {}. Using defaults and environment variables.",
                    path.display()
                );
            }
        }
        Ok(settings.merge(Self::from_env()?))
    }

    /// Coalescing window for scheduled listener updates.
    pub fn update_delay(&self) -> Duration {
        Duration::from_millis(self.update_delay_ms.unwrap_or(100))
    }

    /// Converts into a [`ManagerConfig`]; unset fields keep their defaults.
    pub fn to_manager_config(&self) -> ManagerConfig {
        let mut config = ManagerConfig::default();
        if let Some(ms) = self.cleanup_delay_ms {
            config = config.with_cleanup_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = self.cleanup_delay_on_error_ms {
            config = config.with_cleanup_delay_on_error(Duration::from_millis(ms));
        }
        config
    }
}
