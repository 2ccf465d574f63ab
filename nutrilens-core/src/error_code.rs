//! Canonical error codes recorded on tasks and food logs.

use std::fmt;

/// Canonical error codes surfaced on tasks and food logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    ProviderTimeout,
    ProviderRateLimited,
    ProviderAuthFailed,
    ProviderNotConfigured,
    ProviderNotAvailable,
    /// Refusal with the provider's reason, e.g. `SAFETY`.
    ProviderRefused(String),
    ProviderBadResponse,
    ProviderBadRequest,
    ProviderUpstream5xx,
    ProviderNetworkError,
    ProviderReturnedEmpty,
    ProviderGiveUp,
    MaxAttemptsExceeded,
    ImageMissing,
    ImageNotFound,
    StorageError,
    WorkerTimeout,
    /// A result arrived for a food log that was deleted or completed.
    FoodLogInactive,
    InternalError,
}

impl ErrorCode {
    pub fn as_string(&self) -> String {
        match self {
            Self::ProviderRefused(reason) => format!("PROVIDER_REFUSED_{}", refusal_suffix(reason)),
            other => other.static_str().to_string(),
        }
    }

    fn static_str(&self) -> &'static str {
        match self {
            Self::ProviderTimeout => "PROVIDER_TIMEOUT",
            Self::ProviderRateLimited => "PROVIDER_RATE_LIMITED",
            Self::ProviderAuthFailed => "PROVIDER_AUTH_FAILED",
            Self::ProviderNotConfigured => "PROVIDER_NOT_CONFIGURED",
            Self::ProviderNotAvailable => "PROVIDER_NOT_AVAILABLE",
            Self::ProviderRefused(_) => "PROVIDER_REFUSED",
            Self::ProviderBadResponse => "PROVIDER_BAD_RESPONSE",
            Self::ProviderBadRequest => "PROVIDER_BAD_REQUEST",
            Self::ProviderUpstream5xx => "PROVIDER_UPSTREAM_5XX",
            Self::ProviderNetworkError => "PROVIDER_NETWORK_ERROR",
            Self::ProviderReturnedEmpty => "PROVIDER_RETURNED_EMPTY",
            Self::ProviderGiveUp => "PROVIDER_GIVE_UP",
            Self::MaxAttemptsExceeded => "MAX_ATTEMPTS_EXCEEDED",
            Self::ImageMissing => "IMAGE_MISSING",
            Self::ImageNotFound => "IMAGE_NOT_FOUND",
            Self::StorageError => "STORAGE_ERROR",
            Self::WorkerTimeout => "WORKER_TIMEOUT",
            Self::FoodLogInactive => "FOOD_LOG_INACTIVE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether the failure can succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderTimeout
                | Self::ProviderRateLimited
                | Self::ProviderBadResponse
                | Self::ProviderBadRequest
                | Self::ProviderUpstream5xx
                | Self::ProviderNetworkError
                | Self::ProviderReturnedEmpty
                | Self::StorageError
                | Self::WorkerTimeout
                | Self::InternalError
        )
    }

    /// Structural output failures, capped by a dedicated attempt limit.
    pub fn is_bad_response(&self) -> bool {
        matches!(self, Self::ProviderBadResponse | Self::ProviderBadRequest)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

fn refusal_suffix(reason: &str) -> String {
    let suffix: String = reason
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    if suffix.is_empty() {
        "UNKNOWN".to_string()
    } else {
        suffix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_render_screaming_snake_case() {
        assert_eq!(ErrorCode::ProviderUpstream5xx.as_string(), "PROVIDER_UPSTREAM_5XX");
        assert_eq!(ErrorCode::FoodLogInactive.as_string(), "FOOD_LOG_INACTIVE");
        assert_eq!(
            ErrorCode::ProviderRefused("  ".to_string()).as_string(),
            "PROVIDER_REFUSED_UNKNOWN"
        );
    }

    #[test]
    fn inactive_food_log_is_terminal() {
        assert!(!ErrorCode::FoodLogInactive.is_retryable());
        assert!(!ErrorCode::FoodLogInactive.is_bad_response());
    }
}
