//! Classify inference failures into the canonical error taxonomy.

use std::error::Error as StdError;
use std::io;
use std::sync::LazyLock;

use regex::Regex;

pub use nutrilens_core::ErrorCode;

use crate::error::InferenceError;
use crate::providers::ProviderError;
use crate::router::RouteError;
use crate::storage::StorageError;

/// Longest message copied onto task and food log rows.
const MAX_MESSAGE_CHARS: usize = 500;

static TRY_AGAIN_IN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:try again|retry) in\s+(\d+(?:\.\d+)?)\s*(ms|s|sec|seconds?)?")
        .expect("static regex")
});

static URL_SECRET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([?&](?:key|api_key|apikey|access_token|token)=)[^&\s)]+")
        .expect("static regex")
});

static RETRY_DELAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""retryDelay"\s*:\s*"(\d+(?:\.\d+)?)s""#).expect("static regex")
});

/// Classified failure: a code, a readable message and an optional wait hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedError {
    pub code: ErrorCode,
    pub message: String,
    pub retry_after_sec: Option<u64>,
}

impl MappedError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: truncate(message.into()),
            retry_after_sec: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after_sec: Option<u64>) -> Self {
        self.retry_after_sec = retry_after_sec;
        self
    }
}

fn truncate(message: String) -> String {
    if message.chars().count() <= MAX_MESSAGE_CHARS {
        return message;
    }
    let mut cut: String = message.chars().take(MAX_MESSAGE_CHARS).collect();
    cut.push('…');
    cut
}

/// Map any inference failure onto the canonical taxonomy.
pub fn map_error(error: &InferenceError) -> MappedError {
    match error {
        InferenceError::Routing(RouteError::NotConfigured(code)) => MappedError::new(
            ErrorCode::ProviderNotConfigured,
            format!("Provider '{code}' is not configured"),
        ),
        InferenceError::Routing(RouteError::NotAvailable(code)) => MappedError::new(
            ErrorCode::ProviderNotAvailable,
            format!("Provider '{code}' is configured but has no usable client"),
        ),
        InferenceError::Provider(provider_error) => map_provider_error(provider_error),
        InferenceError::Refused { reason } => MappedError::new(
            ErrorCode::ProviderRefused(reason.clone()),
            format!("Provider refused to analyze the image ({reason})"),
        ),
        InferenceError::BadResponse(detail) => {
            MappedError::new(ErrorCode::ProviderBadResponse, detail.clone())
        }
        InferenceError::Empty => MappedError::new(
            ErrorCode::ProviderReturnedEmpty,
            "Provider returned no usable content",
        ),
        InferenceError::Storage(StorageError::NotFound(key)) => MappedError::new(
            ErrorCode::ImageNotFound,
            format!("Image '{key}' not found in storage"),
        ),
        InferenceError::Storage(StorageError::InvalidKey(key)) => MappedError::new(
            ErrorCode::ImageNotFound,
            format!("Image key '{key}' is not a valid storage key"),
        ),
        InferenceError::Storage(other) => {
            MappedError::new(ErrorCode::StorageError, other.to_string())
        }
    }
}

fn map_provider_error(error: &ProviderError) -> MappedError {
    match error {
        ProviderError::ApiError {
            status,
            message,
            retry_after,
        } => {
            let code = code_for_status(*status);
            let hint = retry_after.or_else(|| retry_after_from_body(message));
            MappedError::new(code, format!("HTTP {status}: {message}")).with_retry_after(hint)
        }
        ProviderError::HttpError(http) => {
            let code = if http.is_timeout() || has_timeout_cause(http) {
                ErrorCode::ProviderTimeout
            } else if let Some(status) = http.status() {
                code_for_status(status.as_u16())
            } else if http.is_decode() {
                ErrorCode::ProviderBadResponse
            } else if http.is_builder() {
                ErrorCode::ProviderNotConfigured
            } else {
                ErrorCode::ProviderNetworkError
            };
            MappedError::new(code, redact_url_secrets(&http.to_string()))
        }
        ProviderError::NoContent => {
            MappedError::new(ErrorCode::ProviderReturnedEmpty, error.to_string())
        }
        ProviderError::Serialization(_) | ProviderError::InvalidFormat(_) => {
            MappedError::new(ErrorCode::ProviderBadResponse, error.to_string())
        }
    }
}

fn code_for_status(status: u16) -> ErrorCode {
    match status {
        401 | 403 => ErrorCode::ProviderAuthFailed,
        404 => ErrorCode::ProviderNotAvailable,
        408 | 504 => ErrorCode::ProviderTimeout,
        429 => ErrorCode::ProviderRateLimited,
        500..=599 => ErrorCode::ProviderUpstream5xx,
        400..=499 => ErrorCode::ProviderBadRequest,
        _ => ErrorCode::ProviderBadResponse,
    }
}

/// Mask credentials passed as URL query parameters.
fn redact_url_secrets(message: &str) -> String {
    URL_SECRET.replace_all(message, "${1}REDACTED").into_owned()
}

/// Walk the source chain looking for an I/O timeout hidden behind wrappers.
fn has_timeout_cause(error: &(dyn StdError + 'static)) -> bool {
    let mut current = error.source();
    while let Some(cause) = current {
        if let Some(io_error) = cause.downcast_ref::<io::Error>()
            && io_error.kind() == io::ErrorKind::TimedOut
        {
            return true;
        }
        current = cause.source();
    }
    false
}

/// Extract a provider-suggested wait from a structured or free-text body.
fn retry_after_from_body(body: &str) -> Option<u64> {
    if let Some(seconds) = RETRY_DELAY
        .captures(body)
        .and_then(|c| c.get(1)?.as_str().parse::<f64>().ok())
    {
        return Some(seconds.ceil() as u64);
    }

    let captures = TRY_AGAIN_IN.captures(body)?;
    let amount: f64 = captures.get(1)?.as_str().parse().ok()?;
    let seconds = match captures.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(unit) if unit == "ms" => amount / 1000.0,
        _ => amount,
    };
    Some(seconds.ceil().max(1.0) as u64)
}

#[cfg(test)]
mod tests {
    use std::fmt;

    use super::*;

    fn api_error(status: u16, message: &str, retry_after: Option<u64>) -> InferenceError {
        InferenceError::Provider(ProviderError::ApiError {
            status,
            message: message.to_string(),
            retry_after,
        })
    }

    #[test]
    fn status_codes_map_to_taxonomy() {
        let cases = [
            (401, ErrorCode::ProviderAuthFailed),
            (403, ErrorCode::ProviderAuthFailed),
            (404, ErrorCode::ProviderNotAvailable),
            (408, ErrorCode::ProviderTimeout),
            (429, ErrorCode::ProviderRateLimited),
            (400, ErrorCode::ProviderBadRequest),
            (500, ErrorCode::ProviderUpstream5xx),
            (503, ErrorCode::ProviderUpstream5xx),
            (504, ErrorCode::ProviderTimeout),
        ];
        for (status, expected) in cases {
            assert_eq!(map_error(&api_error(status, "x", None)).code, expected, "{status}");
        }
    }

    #[test]
    fn refusal_code_carries_reason() {
        let mapped = map_error(&InferenceError::Refused {
            reason: "prohibited content".to_string(),
        });
        assert_eq!(mapped.code.as_string(), "PROVIDER_REFUSED_PROHIBITED_CONTENT");
        assert!(!mapped.code.is_retryable());
    }

    #[test]
    fn retryability() {
        assert!(ErrorCode::ProviderTimeout.is_retryable());
        assert!(ErrorCode::ProviderUpstream5xx.is_retryable());
        assert!(ErrorCode::ProviderReturnedEmpty.is_retryable());
        assert!(ErrorCode::ProviderBadResponse.is_retryable());
        assert!(!ErrorCode::ProviderAuthFailed.is_retryable());
        assert!(!ErrorCode::ProviderNotConfigured.is_retryable());
        assert!(!ErrorCode::ProviderNotAvailable.is_retryable());
        assert!(!ErrorCode::ImageNotFound.is_retryable());
    }

    #[test]
    fn retry_after_header_wins() {
        let mapped = map_error(&api_error(429, "slow down, try again in 5s", Some(30)));
        assert_eq!(mapped.retry_after_sec, Some(30));
    }

    #[test]
    fn retry_after_from_structured_body() {
        let body = r#"{"error":{"code":429,"details":[{"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"17s"}]}}"#;
        let mapped = map_error(&api_error(429, body, None));
        assert_eq!(mapped.code, ErrorCode::ProviderRateLimited);
        assert_eq!(mapped.retry_after_sec, Some(17));
    }

    #[test]
    fn retry_after_from_free_text() {
        assert_eq!(retry_after_from_body("Please try again in 2.5s."), Some(3));
        assert_eq!(retry_after_from_body("Rate limit reached. Try again in 750ms"), Some(1));
        assert_eq!(retry_after_from_body("quota exceeded"), None);
    }

    #[test]
    fn timeout_found_in_source_chain() {
        #[derive(Debug)]
        struct Wrapper(io::Error);
        impl fmt::Display for Wrapper {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("request failed")
            }
        }
        impl StdError for Wrapper {
            fn source(&self) -> Option<&(dyn StdError + 'static)> {
                Some(&self.0)
            }
        }

        #[derive(Debug)]
        struct Outer(Wrapper);
        impl fmt::Display for Outer {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("outer")
            }
        }
        impl StdError for Outer {
            fn source(&self) -> Option<&(dyn StdError + 'static)> {
                Some(&self.0)
            }
        }

        let timed_out = Outer(Wrapper(io::Error::new(io::ErrorKind::TimedOut, "read timed out")));
        assert!(has_timeout_cause(&timed_out));

        let refused = Outer(Wrapper(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "refused",
        )));
        assert!(!has_timeout_cause(&refused));
    }

    #[test]
    fn structural_failures() {
        let mapped = map_error(&InferenceError::BadResponse("not json".to_string()));
        assert_eq!(mapped.code, ErrorCode::ProviderBadResponse);
        assert!(mapped.code.is_bad_response());

        let mapped = map_error(&InferenceError::Provider(ProviderError::InvalidFormat(
            "bad envelope".to_string(),
        )));
        assert_eq!(mapped.code, ErrorCode::ProviderBadResponse);

        assert_eq!(map_error(&InferenceError::Empty).code, ErrorCode::ProviderReturnedEmpty);
    }

    #[test]
    fn storage_failures() {
        let mapped = map_error(&InferenceError::Storage(StorageError::NotFound(
            "a/b.jpg".to_string(),
        )));
        assert_eq!(mapped.code, ErrorCode::ImageNotFound);
        assert!(!mapped.code.is_retryable());
    }

    #[test]
    fn url_credentials_are_masked() {
        let message = "error sending request for url (http://host/models/m:generateContent?key=SECRET-KEY-123)";
        let redacted = redact_url_secrets(message);
        assert!(!redacted.contains("SECRET-KEY-123"));
        assert!(redacted.ends_with("?key=REDACTED)"));
        assert_eq!(redact_url_secrets("connection refused"), "connection refused");
    }

    #[test]
    fn long_messages_are_truncated() {
        let mapped = MappedError::new(ErrorCode::InternalError, "x".repeat(2000));
        assert_eq!(mapped.message.chars().count(), MAX_MESSAGE_CHARS + 1);
    }
}
