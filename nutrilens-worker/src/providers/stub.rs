//! Offline provider used when no real backend is configured.

use crate::providers::provider::{Provider, ProviderError, ProviderRequest, ProviderResponse};

/// Canned answer: a single low-confidence serving with partial nutrients.
const STUB_RESPONSE: &str = r#"{"foodName":"Unknown meal","quantity":{"value":1,"unit":"SERVING"},"nutrients":{"caloriesKcal":400,"carbsG":50,"proteinG":15,"fatG":12,"sugarG":null,"sodiumMg":null,"fiberG":null},"confidence":0.1,"warnings":["LOW_CONFIDENCE","PORTION_ESTIMATED"]}"#;

/// Provider that never touches the network.
#[derive(Debug, Clone, Default)]
pub struct StubProvider;

impl StubProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Provider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn model(&self) -> &str {
        "stub"
    }

    async fn generate(&self, _request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut response = ProviderResponse::from_text("stub", STUB_RESPONSE);
        response.stop_reason = Some("stop".to_string());
        Ok(response)
    }
}
