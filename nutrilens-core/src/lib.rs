pub mod config;
pub mod error_code;
pub mod nutrition;
pub mod task;

// Config re-exports
pub use config::{
    Config, ConfigError, LoggingSettings, ProviderConfig, ProviderKind, RetrySettings, Secrets,
    SecretsError, Settings, SettingsError, WorkerSettings, load_dotenv,
};

// Domain re-exports
pub use error_code::ErrorCode;
pub use nutrition::{
    CanonicalResult, LabelBasis, LabelMeta, NutrientField, Nutrients, Quantity, QuantityUnit,
    ResultWarning,
};
pub use task::TaskKind;

#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
