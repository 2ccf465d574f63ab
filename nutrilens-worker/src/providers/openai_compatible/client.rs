//! OpenAI-compatible API client.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::providers::provider::{
    Provider, ProviderContentBlock, ProviderError, ProviderRequest, ProviderResponse,
    ProviderUsage, retry_after_header,
};
use crate::providers::query_dump::QueryDump;

/// OpenAI-compatible API client.
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    http_client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    provider_name: String,
    dump_queries: bool,
}

/// Request body for the Chat Completions API
#[derive(Debug, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: Vec<OpenAiContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAiContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

/// OpenAI-compatible chat completion response
#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

/// Choice in the response
#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    refusal: Option<String>,
}

/// Usage information
#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl OpenAiCompatibleClient {
    /// Create a new OpenAI-compatible client.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        provider_name: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            api_key,
            model: model.into(),
            base_url: base_url.into(),
            provider_name: provider_name.into(),
            dump_queries: false,
        })
    }

    /// Enable or disable debug query logging
    pub fn with_dump_queries(mut self, enabled: bool) -> Self {
        self.dump_queries = enabled;
        self
    }

    /// Build request headers with optional auth.
    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &self.api_key {
            let auth_value = format!("Bearer {}", api_key);
            if let Ok(header_value) = HeaderValue::from_str(&auth_value) {
                headers.insert(AUTHORIZATION, header_value);
            }
        }

        headers
    }

    fn chat_completions_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    fn build_request(&self, request: &ProviderRequest) -> ChatCompletionsRequest {
        let mut content = vec![OpenAiContentPart::Text {
            text: request.prompt.clone(),
        }];
        if let Some(image) = &request.image {
            content.push(OpenAiContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:{};base64,{}", image.mime_type, image.data),
                },
            });
        }

        ChatCompletionsRequest {
            model: self.model.clone(),
            messages: vec![OpenAiMessage {
                role: "user",
                content,
            }],
            max_tokens: request.max_output_tokens,
            temperature: request.temperature,
            response_format: request
                .response_schema
                .as_ref()
                .map(|_| serde_json::json!({ "type": "json_object" })),
        }
    }

    /// Convert OpenAI response to provider response
    fn convert_response(&self, response: ChatCompletionsResponse, raw_json: &str) -> ProviderResponse {
        let choice = response.choices.into_iter().next();
        let stop_reason = choice.as_ref().and_then(|c| c.finish_reason.clone());

        let mut content = Vec::new();
        let mut refusal = None;

        if let Some(message) = choice.and_then(|c| c.message) {
            if let Some(text) = message.content
                && !text.is_empty()
            {
                content.push(ProviderContentBlock::Text { text });
            }
            refusal = message
                .refusal
                .filter(|r| !r.trim().is_empty())
                .map(|_| "REFUSAL".to_string());
        }

        if refusal.is_none() && stop_reason.as_deref() == Some("content_filter") {
            refusal = Some("CONTENT_FILTER".to_string());
        }

        ProviderResponse {
            model: response.model.unwrap_or_else(|| self.model.clone()),
            content,
            usage: response.usage.map(|u| ProviderUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
            stop_reason,
            refusal,
            raw_json: if self.dump_queries {
                Some(raw_json.to_string())
            } else {
                None
            },
        }
    }
}

#[async_trait::async_trait]
impl Provider for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        &self.provider_name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let url = self.chat_completions_url();
        let request_body = self.build_request(request);

        let dump = if self.dump_queries
            && let Ok(val) = serde_json::to_value(&request_body)
        {
            QueryDump::request(&self.provider_name, &self.model, &val).await
        } else {
            None
        };

        let response = self
            .http_client
            .post(&url)
            .headers(self.build_headers())
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_header(response.headers());
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: error_text,
                retry_after,
            });
        }

        let response_text = response.text().await?;

        if let Some(dump) = &dump
            && let Ok(val) = serde_json::from_str::<Value>(&response_text)
        {
            dump.response(&val).await;
        }

        let completions_response: ChatCompletionsResponse = serde_json::from_str(&response_text)
            .map_err(|e| {
                let preview = if response_text.len() > 500 {
                    &response_text[..response_text.floor_char_boundary(500)]
                } else {
                    &response_text
                };
                ProviderError::InvalidFormat(format!(
                    "Failed to parse OpenAI-compatible response: {e}\nBody preview: {preview}"
                ))
            })?;
        Ok(self.convert_response(completions_response, &response_text))
    }
}
