//! Settings configuration loaded from TOML files.
//!
//! This module handles non-sensitive configuration stored in TOML format
//! in the XDG config directory (~/.config/nutrilens/config.toml).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Provider client implementations that can back a provider code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Gemini,
    OpenAiCompatible,
    Stub,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAiCompatible => "openai_compatible",
            ProviderKind::Stub => "stub",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gemini" => Ok(ProviderKind::Gemini),
            "openai_compatible" | "openai-compatible" | "openai" => {
                Ok(ProviderKind::OpenAiCompatible)
            }
            "stub" => Ok(ProviderKind::Stub),
            _ => Err(format!("Unknown provider kind: {}", s)),
        }
    }
}

/// Default TOML configuration file content
const DEFAULT_CONFIG_TOML: &str = r#"# nutrilens configuration file
# Located at: ~/.config/nutrilens/config.toml
#
# This file contains non-sensitive configuration.
# Secrets (API keys) are loaded from environment variables:
#   - GEMINI_API_KEY
#   - OPENAI_API_KEY (optional, for openai_compatible providers)

# Provider code used when a food log does not declare one (must exist under [providers])
default_provider = "gemini"
# When true, a food log's declared provider must resolve or the task fails fast
strict_provider_routing = false

[providers]
[providers.gemini]
kind = "gemini"
model = "gemini-2.5-flash"
# api_key_env = "GEMINI_API_KEY"

# [providers.local]
# kind = "openai_compatible"
# model = "qwen2.5-vl"
# base_url = "http://127.0.0.1:8080/v1"

[worker]
interval_seconds = 5
batch_size = 10
max_attempts = 5
label_max_attempts = 2
bad_response_max_attempts = 2
max_repair_calls = 1
poll_after_seconds = 3
rate_limit_retry_after_seconds = 60
stuck_timeout_seconds = 300
reaper_interval_seconds = 60
max_in_flight_per_provider = 4

[retry]
schedule_seconds = [2, 5, 10, 20, 40]
cap_seconds = 60

[storage]
# root = "/var/lib/nutrilens/blobs"

[database]
# path = "/var/lib/nutrilens/nutrilens.sqlite3"

[logging]
level = "info"
# dump_queries = true
"#;

/// Settings loaded from TOML configuration file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    /// Configured providers keyed by provider code
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Provider code used when a food log declares none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,

    /// Fail fast instead of falling back when a declared provider is missing
    #[serde(default)]
    pub strict_provider_routing: bool,

    /// Task worker settings
    #[serde(default)]
    pub worker: WorkerSettings,

    /// Backoff schedule
    #[serde(default)]
    pub retry: RetrySettings,

    /// Blob store settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Database settings
    #[serde(default)]
    pub database: DatabaseSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Provider configuration entry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Client implementation ("gemini", "openai_compatible", "stub")
    #[serde(
        deserialize_with = "deserialize_provider_kind",
        serialize_with = "serialize_provider_kind"
    )]
    pub kind: ProviderKind,
    /// Model identifier
    #[serde(default)]
    pub model: String,
    /// Base URL (required for openai_compatible providers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Optional env var name used to resolve the provider API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// HTTP request timeout for this provider (default: 60).
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

/// Task worker settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerSettings {
    /// Seconds between worker cycles (default: 5).
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Maximum tasks claimed per cycle (default: 10).
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Provider invocations allowed for MEAL tasks (default: 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Provider invocations allowed for LABEL tasks (default: 2).
    #[serde(default = "default_label_max_attempts")]
    pub label_max_attempts: u32,
    /// Attempts after which bad-response failures stop retrying (default: 2).
    #[serde(default = "default_bad_response_max_attempts")]
    pub bad_response_max_attempts: u32,
    /// Text-only repair calls per attempt (default: 1).
    #[serde(default = "default_max_repair_calls")]
    pub max_repair_calls: u32,
    /// Poll hint handed to clients while a task is pending (default: 3).
    #[serde(default = "default_poll_after_seconds")]
    pub poll_after_seconds: u32,
    /// Retry-after hint used when a rate-limited provider gives none (default: 60).
    #[serde(default = "default_rate_limit_retry_after_seconds")]
    pub rate_limit_retry_after_seconds: u64,
    /// Seconds before a RUNNING task is considered abandoned (default: 300).
    #[serde(default = "default_stuck_timeout_seconds")]
    pub stuck_timeout_seconds: u64,
    /// Seconds between stuck-task sweeps (default: 60).
    #[serde(default = "default_reaper_interval_seconds")]
    pub reaper_interval_seconds: u64,
    /// Concurrent provider calls per provider code in this process (default: 4).
    #[serde(default = "default_max_in_flight_per_provider")]
    pub max_in_flight_per_provider: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            label_max_attempts: default_label_max_attempts(),
            bad_response_max_attempts: default_bad_response_max_attempts(),
            max_repair_calls: default_max_repair_calls(),
            poll_after_seconds: default_poll_after_seconds(),
            rate_limit_retry_after_seconds: default_rate_limit_retry_after_seconds(),
            stuck_timeout_seconds: default_stuck_timeout_seconds(),
            reaper_interval_seconds: default_reaper_interval_seconds(),
            max_in_flight_per_provider: default_max_in_flight_per_provider(),
        }
    }
}

/// Backoff schedule
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrySettings {
    /// Delay after the n-th failed attempt (default: [2, 5, 10, 20, 40]).
    #[serde(default = "default_schedule_seconds")]
    pub schedule_seconds: Vec<u64>,
    /// Upper bound for any delay (default: 60).
    #[serde(default = "default_cap_seconds")]
    pub cap_seconds: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            schedule_seconds: default_schedule_seconds(),
            cap_seconds: default_cap_seconds(),
        }
    }
}

/// Blob store settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageSettings {
    /// Root directory of the content-addressed blob store
    pub root: Option<String>,
}

/// Database settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseSettings {
    /// Override for the SQLite database file
    pub path: Option<String>,
}

/// Logging settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Dump raw provider request/response JSON to ./logs/queries/
    #[serde(default)]
    pub dump_queries: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dump_queries: false,
        }
    }
}

// Default value functions
fn default_request_timeout_seconds() -> u64 {
    60
}

fn default_interval_seconds() -> u64 {
    5
}

fn default_batch_size() -> u32 {
    10
}

fn default_max_attempts() -> u32 {
    5
}

fn default_label_max_attempts() -> u32 {
    2
}

fn default_bad_response_max_attempts() -> u32 {
    2
}

fn default_max_repair_calls() -> u32 {
    1
}

fn default_poll_after_seconds() -> u32 {
    3
}

fn default_rate_limit_retry_after_seconds() -> u64 {
    60
}

fn default_stuck_timeout_seconds() -> u64 {
    300
}

fn default_reaper_interval_seconds() -> u64 {
    60
}

fn default_max_in_flight_per_provider() -> usize {
    4
}

fn default_schedule_seconds() -> Vec<u64> {
    vec![2, 5, 10, 20, 40]
}

fn default_cap_seconds() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn deserialize_provider_kind<'de, D>(deserializer: D) -> Result<ProviderKind, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    value.parse().map_err(serde::de::Error::custom)
}

fn serialize_provider_kind<S>(kind: &ProviderKind, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(kind.as_str())
}

/// Errors that can occur when loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config directory not found")]
    ConfigDirNotFound,
}

impl Settings {
    /// Load settings from the TOML configuration file.
    ///
    /// If the config file doesn't exist, creates it with default values.
    pub fn load() -> Result<Self, SettingsError> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::info!("Creating default configuration at {:?}", config_path);
            Self::create_default_config(&config_path)?;
        }

        let content = fs::read_to_string(&config_path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from TOML content.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(content)?;
        Ok(settings)
    }

    /// Serialize settings to TOML content.
    pub fn to_toml(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Get the configuration file path.
    ///
    /// `NUTRILENS_CONFIG_DIR` overrides the XDG config directory.
    pub fn config_path() -> Result<PathBuf, SettingsError> {
        if let Ok(override_dir) = std::env::var("NUTRILENS_CONFIG_DIR") {
            return Ok(PathBuf::from(override_dir).join("config.toml"));
        }

        let config_dir = dirs::config_dir()
            .ok_or(SettingsError::ConfigDirNotFound)?
            .join("nutrilens");

        Ok(config_dir.join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG_TOML)?;
        Ok(())
    }

    /// Provider config for the default provider code, if any.
    pub fn default_provider_config(&self) -> Option<&ProviderConfig> {
        self.default_provider
            .as_deref()
            .and_then(|code| self.providers.get(code))
    }
}
