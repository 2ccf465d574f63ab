//! Secrets configuration loaded from environment variables only.
//!
//! API keys are never written to the TOML settings file.

use std::env;

/// Secrets loaded exclusively from environment variables.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    /// Gemini API key (env: GEMINI_API_KEY)
    pub gemini_api_key: Option<String>,

    /// OpenAI-compatible API key (env: OPENAI_API_KEY)
    pub openai_api_key: Option<String>,
}

/// Errors that can occur when resolving secrets
#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    #[error("Environment variable '{0}' is set but empty")]
    EmptySecret(String),
}

impl Secrets {
    /// Load secrets from environment variables, reading `.env` first.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_env_inner()
    }

    pub(crate) fn from_env_inner() -> Self {
        Self {
            gemini_api_key: non_empty_var("GEMINI_API_KEY"),
            openai_api_key: non_empty_var("OPENAI_API_KEY"),
        }
    }

    /// Resolve a key from an explicitly named env var.
    pub fn from_named_env(name: &str) -> Result<Option<String>, SecretsError> {
        match env::var(name) {
            Ok(value) if value.trim().is_empty() => Err(SecretsError::EmptySecret(name.to_string())),
            Ok(value) => Ok(Some(value)),
            Err(_) => Ok(None),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
