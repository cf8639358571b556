//! Daemon configuration stored in `~/.callsync/config.json`.
//!
//! Every field has a serde default, so a missing file is equivalent to `{}`.
//! The API key and database path may also come from the environment
//! (`ELEVENLABS_API_KEY`, `CALLSYNC_DB_PATH`), which wins over the file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::elevenlabs::ElevenLabsConfig;
use crate::normalize::NormalizeOptions;
use crate::types::{FIELD_CASE_ID, FIELD_MODE, FIELD_PLACE, FIELD_TIME, REQUIRED_FIELDS};

pub const API_KEY_ENV: &str = "ELEVENLABS_API_KEY";
pub const DB_PATH_ENV: &str = "CALLSYNC_DB_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub elevenlabs: ElevenLabsConfig,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub normalizer: NormalizerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            elevenlabs: ElevenLabsConfig::default(),
            database_path: default_database_path(),
            poller: PollerConfig::default(),
            normalizer: NormalizerConfig::default(),
        }
    }
}

/// Poll loop timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Pause after a failed full sync before the next check.
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    #[serde(default)]
    pub startup_delay_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_error_backoff_secs() -> u64 {
    60
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            startup_delay_secs: 0,
        }
    }
}

impl PollerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

/// Normalizer settings: the time zone call timestamps are rendered in, and
/// which data-collection entries feed each extracted field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizerConfig {
    /// IANA zone name. Fixed per deployment; the host zone is never consulted.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Extracted field key -> data-collection entry name.
    #[serde(default = "default_fields")]
    pub fields: BTreeMap<String, String>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_fields() -> BTreeMap<String, String> {
    [
        (FIELD_MODE, "forma"),
        (FIELD_TIME, "tiempo"),
        (FIELD_PLACE, "lugar"),
        (FIELD_CASE_ID, "id_extorsion"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            fields: default_fields(),
        }
    }
}

fn default_database_path() -> String {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".callsync")
        .join("callsync.db")
        .to_string_lossy()
        .to_string()
}

impl Config {
    /// Parse the configured time zone.
    pub fn timezone(&self) -> Result<Tz, String> {
        self.normalizer
            .timezone
            .parse::<Tz>()
            .map_err(|e| format!("Invalid timezone '{}': {}", self.normalizer.timezone, e))
    }

    pub fn normalize_options(&self) -> Result<NormalizeOptions, String> {
        Ok(NormalizeOptions {
            timezone: self.timezone()?,
            fields: self
                .normalizer
                .fields
                .iter()
                .map(|(key, source)| (key.clone(), source.clone()))
                .collect(),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.database_path)
    }

    /// Fill required extracted-field mappings and reject unusable values.
    fn validate(&mut self) -> Result<(), String> {
        let defaults = default_fields();
        for key in REQUIRED_FIELDS {
            if !self.normalizer.fields.contains_key(key) {
                self.normalizer
                    .fields
                    .insert(key.to_string(), defaults[key].clone());
            }
        }

        self.timezone()?;

        if self.poller.poll_interval_secs == 0 {
            return Err("poller.pollIntervalSecs must be greater than 0".to_string());
        }
        if self.poller.error_backoff_secs == 0 {
            return Err("poller.errorBackoffSecs must be greater than 0".to_string());
        }
        if self.elevenlabs.request_timeout_secs == 0 {
            return Err("elevenlabs.requestTimeoutSecs must be greater than 0".to_string());
        }
        if self.database_path.trim().is_empty() {
            return Err("databasePath must not be empty".to_string());
        }
        Ok(())
    }
}

/// Resolve the default config path: `~/.callsync/config.json`.
pub fn config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".callsync").join("config.json"))
}

/// Load config from `path` (or the default location), then apply env overrides.
///
/// An explicit path must exist; the default path may be absent.
pub fn load_config(path: Option<&Path>) -> Result<Config, String> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

fn load_config_with_env<F>(path: Option<&Path>, env: F) -> Result<Config, String>
where
    F: Fn(&str) -> Option<String>,
{
    let (config_path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (config_path()?, false),
    };

    let mut config: Config = if config_path.exists() {
        let content = fs::read_to_string(&config_path)
            .map_err(|e| format!("Failed to read config {}: {}", config_path.display(), e))?;
        serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config {}: {}", config_path.display(), e))?
    } else if required {
        return Err(format!("Config file not found at {}", config_path.display()));
    } else {
        log::info!(
            "No config file at {}; using defaults",
            config_path.display()
        );
        Config::default()
    };

    if let Some(key) = env(API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
        config.elevenlabs.api_key = Some(key);
    }
    if let Some(db_path) = env(DB_PATH_ENV).filter(|p| !p.trim().is_empty()) {
        config.database_path = db_path;
    }

    config.validate()?;
    Ok(config)
}
