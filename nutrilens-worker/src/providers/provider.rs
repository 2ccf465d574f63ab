//! Provider trait for abstracting different vision model backends.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inline image attached to a request.
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub mime_type: String,
    /// Base64-encoded bytes
    pub data: String,
}

/// A single-turn generation request.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub prompt: String,
    pub image: Option<InlineImage>,
    /// JSON schema for providers that support constrained output
    pub response_schema: Option<Value>,
    pub max_output_tokens: u32,
    pub temperature: Option<f32>,
}

impl ProviderRequest {
    /// Text-only request, used for repair calls.
    pub fn text(prompt: impl Into<String>, max_output_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            image: None,
            response_schema: None,
            max_output_tokens,
            temperature: None,
        }
    }

    pub fn with_image(mut self, image: InlineImage) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Unified content block across providers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderContentBlock {
    Text { text: String },
}

/// Unified usage information across providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Unified response type across providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub model: String,
    pub content: Vec<ProviderContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ProviderUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    /// Refusal reason reported by the provider (block reason, safety finish, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
    /// Raw JSON response from the provider for debugging.
    #[serde(skip)]
    pub raw_json: Option<String>,
}

impl ProviderResponse {
    /// Response holding a single text block.
    pub fn from_text(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            content: vec![ProviderContentBlock::Text { text: text.into() }],
            usage: None,
            stop_reason: None,
            refusal: None,
            raw_json: None,
        }
    }
}

/// Provider error types
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("API error ({status}): {message}")]
    ApiError {
        status: u16,
        message: String,
        /// Seconds from a `Retry-After` header
        retry_after: Option<u64>,
    },
    #[error("No content in response")]
    NoContent,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid response format: {0}")]
    InvalidFormat(String),
}

/// Provider trait for different model backends
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Provider name
    fn name(&self) -> &str;

    /// Current model
    fn model(&self) -> &str;

    /// Run one generation round-trip.
    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError>;
}

/// Join all text content from a response
pub fn extract_all_text(response: &ProviderResponse) -> String {
    response
        .content
        .iter()
        .map(|block| match block {
            ProviderContentBlock::Text { text } => text.as_str(),
        })
        .collect::<Vec<_>>()
        .join("")
}

/// Parse a `Retry-After` header given in seconds.
pub(crate) fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}
