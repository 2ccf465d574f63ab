//! Configuration management for nutrilens.
//!
//! Secrets come from environment variables, settings from a TOML file.
//!
//! # Configuration Sources
//!
//! ## Secrets (Environment Variables)
//! - `GEMINI_API_KEY` - Gemini API key
//! - `OPENAI_API_KEY` - key for `openai_compatible` providers
//!
//! ## Settings (TOML File)
//! Located at `~/.config/nutrilens/config.toml`:
//! ```toml
//! default_provider = "gemini"
//!
//! [providers.gemini]
//! kind = "gemini"
//! model = "gemini-2.5-flash"
//!
//! [worker]
//! max_attempts = 5
//! ```

mod secrets;
mod settings;

use std::path::PathBuf;

pub use secrets::{Secrets, SecretsError};
pub use settings::{
    DatabaseSettings, LoggingSettings, ProviderConfig, ProviderKind, RetrySettings, Settings,
    SettingsError, StorageSettings, WorkerSettings,
};

/// Combined configuration containing both secrets and settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Secrets loaded from environment variables
    pub secrets: Secrets,
    /// Settings loaded from TOML configuration file
    pub settings: Settings,
}

/// Errors that can occur when loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Secrets error: {0}")]
    Secrets(#[from] SecretsError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Default provider '{0}' not found in [providers]")]
    DefaultProviderNotFound(String),

    #[error("Provider '{0}' (openai_compatible) requires base_url")]
    MissingBaseUrl(String),

    #[error("Retry schedule must contain at least one delay")]
    EmptyRetrySchedule,

    #[error("Data directory not found")]
    NoDataDir,
}

impl Config {
    /// Load configuration from all sources and validate it.
    pub fn load() -> Result<Self, ConfigError> {
        let secrets = Secrets::from_env();
        let settings = Settings::load()?;
        let config = Self { secrets, settings };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(code) = self.settings.default_provider.as_deref()
            && !self.settings.providers.contains_key(code)
        {
            return Err(ConfigError::DefaultProviderNotFound(code.to_string()));
        }

        for (code, provider) in &self.settings.providers {
            if provider.kind == ProviderKind::OpenAiCompatible
                && provider
                    .base_url
                    .as_deref()
                    .is_none_or(|url| url.trim().is_empty())
            {
                return Err(ConfigError::MissingBaseUrl(code.clone()));
            }
        }

        if self.settings.retry.schedule_seconds.is_empty() {
            return Err(ConfigError::EmptyRetrySchedule);
        }

        Ok(())
    }

    /// Resolve the API key for a provider code.
    ///
    /// An explicit `api_key_env` wins over the kind's default variable.
    pub fn api_key_for(&self, code: &str) -> Result<Option<String>, ConfigError> {
        let Some(provider) = self.settings.providers.get(code) else {
            return Ok(None);
        };

        if let Some(env_name) = provider.api_key_env.as_deref() {
            return Ok(Secrets::from_named_env(env_name)?);
        }

        Ok(match provider.kind {
            ProviderKind::Gemini => self.secrets.gemini_api_key.clone(),
            ProviderKind::OpenAiCompatible => self.secrets.openai_api_key.clone(),
            ProviderKind::Stub => None,
        })
    }

    /// SQLite database file location.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = self.settings.database.path.as_deref() {
            return Ok(PathBuf::from(path));
        }
        let data_dir = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;
        Ok(data_dir.join("nutrilens").join("nutrilens.sqlite3"))
    }

    /// Blob store root directory.
    pub fn storage_root(&self) -> Result<PathBuf, ConfigError> {
        if let Some(root) = self.settings.storage.root.as_deref() {
            return Ok(PathBuf::from(root));
        }
        let data_dir = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;
        Ok(data_dir.join("nutrilens").join("blobs"))
    }
}

/// Load .env file if it exists (for development convenience).
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ENV_MUTEX;
    use std::env;

    fn provider(kind: ProviderKind) -> ProviderConfig {
        ProviderConfig {
            kind,
            model: "m".to_string(),
            base_url: None,
            api_key_env: None,
            request_timeout_seconds: 60,
        }
    }

    #[test]
    fn test_default_provider_must_exist() {
        let mut settings = Settings::default();
        settings.default_provider = Some("gemini".to_string());
        let config = Config {
            secrets: Secrets::default(),
            settings: settings.clone(),
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DefaultProviderNotFound(_))
        ));

        settings
            .providers
            .insert("gemini".to_string(), provider(ProviderKind::Gemini));
        let config = Config {
            secrets: Secrets::default(),
            settings,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_openai_compatible_requires_base_url() {
        let mut settings = Settings::default();
        settings
            .providers
            .insert("local".to_string(), provider(ProviderKind::OpenAiCompatible));
        let config = Config {
            secrets: Secrets::default(),
            settings,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingBaseUrl(code)) if code == "local"
        ));
    }

    #[test]
    fn test_empty_retry_schedule_rejected() {
        let mut settings = Settings::default();
        settings.retry.schedule_seconds.clear();
        let config = Config {
            secrets: Secrets::default(),
            settings,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyRetrySchedule)
        ));
    }

    #[test]
    fn test_api_key_resolution() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { env::set_var("NUTRILENS_CUSTOM_KEY", "custom") }

        let mut settings = Settings::default();
        settings
            .providers
            .insert("gemini".to_string(), provider(ProviderKind::Gemini));
        let mut custom = provider(ProviderKind::Gemini);
        custom.api_key_env = Some("NUTRILENS_CUSTOM_KEY".to_string());
        settings.providers.insert("custom".to_string(), custom);
        settings
            .providers
            .insert("fake".to_string(), provider(ProviderKind::Stub));

        let config = Config {
            secrets: Secrets {
                gemini_api_key: Some("g".to_string()),
                openai_api_key: None,
            },
            settings,
        };

        assert_eq!(config.api_key_for("gemini").unwrap().as_deref(), Some("g"));
        assert_eq!(
            config.api_key_for("custom").unwrap().as_deref(),
            Some("custom")
        );
        assert_eq!(config.api_key_for("fake").unwrap(), None);
        assert_eq!(config.api_key_for("missing").unwrap(), None);

        unsafe { env::remove_var("NUTRILENS_CUSTOM_KEY") }
    }

    #[test]
    fn test_path_overrides() {
        let mut settings = Settings::default();
        settings.database.path = Some("/tmp/n.sqlite3".to_string());
        settings.storage.root = Some("/tmp/blobs".to_string());
        let config = Config {
            secrets: Secrets::default(),
            settings,
        };
        assert_eq!(
            config.database_path().unwrap(),
            PathBuf::from("/tmp/n.sqlite3")
        );
        assert_eq!(config.storage_root().unwrap(), PathBuf::from("/tmp/blobs"));
    }
}
