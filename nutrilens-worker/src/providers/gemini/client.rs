//! Google Gemini API client.

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::providers::provider::{
    Provider, ProviderContentBlock, ProviderError, ProviderRequest, ProviderResponse,
    ProviderUsage, retry_after_header,
};
use crate::providers::query_dump::QueryDump;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Finish reasons that mean the model declined to answer.
const REFUSAL_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
];

/// Gemini API client
#[derive(Clone)]
pub struct GeminiClient {
    http_client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    dump_queries: bool,
}

/// Request body for the Gemini generateContent API
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    role: &'static str,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

/// Generation configuration
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
}

/// Response from the generateContent API
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Candidate response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
    #[serde(default)]
    safety_ratings: Vec<SafetyRating>,
}

#[derive(Debug, Clone, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Clone, Deserialize)]
struct CandidatePart {
    text: Option<String>,
    /// Thinking models mark reasoning parts with `thought: true`
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct SafetyRating {
    category: Option<String>,
    #[serde(default)]
    blocked: bool,
}

/// Usage metadata
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            dump_queries: false,
        })
    }

    /// Override the API base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Enable or disable debug query logging
    pub fn with_dump_queries(mut self, enabled: bool) -> Self {
        self.dump_queries = enabled;
        self
    }

    fn build_request(request: &ProviderRequest) -> GenerateContentRequest {
        let mut parts = vec![RequestPart::Text {
            text: request.prompt.clone(),
        }];
        if let Some(image) = &request.image {
            parts.push(RequestPart::InlineData {
                inline_data: InlineData {
                    mime_type: image.mime_type.clone(),
                    data: image.data.clone(),
                },
            });
        }

        GenerateContentRequest {
            contents: vec![RequestContent {
                role: "user",
                parts,
            }],
            generation_config: GenerationConfig {
                max_output_tokens: request.max_output_tokens,
                temperature: request.temperature,
                response_mime_type: request
                    .response_schema
                    .as_ref()
                    .map(|_| "application/json"),
                response_schema: request.response_schema.clone(),
            },
        }
    }

    async fn send(
        &self,
        request: &ProviderRequest,
    ) -> Result<(GenerateContentResponse, String), ProviderError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let request_body = Self::build_request(request);

        let dump_handle = if self.dump_queries {
            let request_value: Value = serde_json::to_value(&request_body)?;
            QueryDump::request("gemini", &self.model, &request_value).await
        } else {
            None
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;

        let status = response.status();
        let retry_after = retry_after_header(response.headers());
        let response_text = response
            .text()
            .await
            .map_err(reqwest::Error::without_url)?;

        if let Some(handle) = dump_handle
            && let Ok(response_value) = serde_json::from_str::<Value>(&response_text)
        {
            handle.response(&response_value).await;
        }

        if !status.is_success() {
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: response_text,
                retry_after,
            });
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&response_text)?;

        Ok((parsed, response_text))
    }
}

/// Find a refusal signal in a Gemini response.
fn detect_refusal(response: &GenerateContentResponse) -> Option<String> {
    if let Some(reason) = response
        .prompt_feedback
        .as_ref()
        .and_then(|feedback| feedback.block_reason.as_deref())
        .filter(|reason| !reason.is_empty() && *reason != "BLOCK_REASON_UNSPECIFIED")
    {
        return Some(reason.to_string());
    }

    let candidate = response.candidates.first()?;

    if let Some(reason) = candidate
        .finish_reason
        .as_deref()
        .filter(|reason| REFUSAL_FINISH_REASONS.contains(reason))
    {
        return Some(reason.to_string());
    }

    candidate
        .safety_ratings
        .iter()
        .find(|rating| rating.blocked)
        .map(|rating| {
            rating
                .category
                .clone()
                .unwrap_or_else(|| "SAFETY".to_string())
        })
}

#[async_trait::async_trait]
impl Provider for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let (response, raw_json) = self.send(request).await?;
        Ok(convert_response(&self.model, response, raw_json))
    }
}

fn convert_response(
    model: &str,
    response: GenerateContentResponse,
    raw_json: String,
) -> ProviderResponse {
    let refusal = detect_refusal(&response);

    let candidate = response.candidates.first();

    let content = candidate
        .and_then(|c| c.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter(|part| !part.thought)
                .filter_map(|part| part.text.clone())
                .map(|text| ProviderContentBlock::Text { text })
                .collect()
        })
        .unwrap_or_default();

    let usage = response.usage_metadata.map(|u| ProviderUsage {
        input_tokens: u.prompt_token_count,
        output_tokens: u.candidates_token_count,
    });

    ProviderResponse {
        model: model.to_string(),
        content,
        usage,
        stop_reason: candidate.and_then(|c| c.finish_reason.clone()),
        refusal,
        raw_json: Some(raw_json),
    }
}
