//! Live tests for the Gemini provider (requires --features live-tests).

#[cfg(feature = "live-tests")]
use std::time::Duration;

#[cfg(feature = "live-tests")]
use nutrilens_core::TaskKind;
#[cfg(feature = "live-tests")]
use nutrilens_worker::analyzer::response_schema;
#[cfg(feature = "live-tests")]
use nutrilens_worker::providers::GeminiClient;
#[cfg(feature = "live-tests")]
use nutrilens_worker::resilience::{normalize, parse_lenient};
#[cfg(feature = "live-tests")]
use nutrilens_worker::{Provider, ProviderRequest, extract_all_text};

#[cfg(feature = "live-tests")]
fn load_gemini_client() -> Option<GeminiClient> {
    nutrilens_core::load_dotenv();

    let api_key = match std::env::var("GEMINI_API_KEY") {
        Ok(value) if !value.trim().is_empty() => value,
        _ => {
            eprintln!("GEMINI_API_KEY not set; skipping Gemini live test.");
            return None;
        }
    };

    GeminiClient::new(api_key, "gemini-2.5-flash", Duration::from_secs(60)).ok()
}

#[cfg(feature = "live-tests")]
#[tokio::test]
async fn test_gemini_structured_answer_normalizes() {
    let Some(client) = load_gemini_client() else {
        return;
    };

    let request = ProviderRequest::text(
        "Estimate nutrients for one bowl of plain cooked white rice (about 200 g). \
         Respond with a single JSON object with foodName and nutrients \
         {caloriesKcal, proteinG, carbsG, fatG, fiberG, sugarG, sodiumMg}.",
        1024,
    )
    .with_schema(response_schema(TaskKind::Meal))
    .with_temperature(0.0);

    let response = client.generate(&request).await.expect("Gemini request failed");
    assert!(response.refusal.is_none());

    let text = extract_all_text(&response);
    let object = parse_lenient(&text).expect("answer should parse");
    let result = normalize(&object);
    let kcal = result.nutrients.calories_kcal.expect("calories present");
    assert!((100.0..600.0).contains(&kcal), "implausible calories: {kcal}");
}
