//! One inference attempt: provider call, resilience pipeline, bounded repair.

use nutrilens_core::{CanonicalResult, ResultWarning, TaskKind};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::InferenceError;
use crate::providers::{InlineImage, Provider, ProviderRequest, ProviderResponse, extract_all_text};
use crate::resilience::{GateVerdict, evaluate, normalize, parse_lenient, salvage};

const ANALYSIS_MAX_OUTPUT_TOKENS: u32 = 1024;
const REPAIR_MAX_OUTPUT_TOKENS: u32 = 512;

/// Longest prior output quoted back to the model in a repair call.
const REPAIR_QUOTE_MAX_CHARS: usize = 4000;

const OUTPUT_CONTRACT: &str = "Respond with a single minified JSON object and nothing else. \
Fields: foodName (string or null), quantity {value (number), unit (SERVING|GRAM|MILLILITER|PIECE)}, \
nutrients {caloriesKcal, proteinG, carbsG, fatG, fiberG, sugarG, sodiumMg} (numbers or null), \
confidence (0..1), warnings (array of NO_FOOD_DETECTED, NO_LABEL_DETECTED, LOW_CONFIDENCE, \
PORTION_ESTIMATED, MULTIPLE_ITEMS, PARTIAL_NUTRIENTS, BLURRY_IMAGE).";

const MEAL_PROMPT: &str = "You are a nutrition assistant. Identify the meal in the photo, \
estimate the portion shown and its nutrients. If the photo contains no food, return all \
nutrients as null with the warning NO_FOOD_DETECTED.";

const LABEL_PROMPT: &str = "You are a nutrition assistant. Read the nutrition facts label in \
the photo and copy its values exactly. Also return labelMeta {servingsPerContainer (number or \
null), basis (PER_SERVING|PER_100G|PER_100ML|PER_PACKAGE)}. If no label is readable, return \
all nutrients as null with the warning NO_LABEL_DETECTED.";

/// Runs the resilience pipeline around provider calls.
#[derive(Debug, Clone)]
pub struct NutritionAnalyzer {
    max_repair_calls: u32,
}

impl NutritionAnalyzer {
    pub fn new(max_repair_calls: u32) -> Self {
        Self { max_repair_calls }
    }

    /// Analyze one image into a canonical result.
    ///
    /// Syntax and quality problems are absorbed by healing, repair and
    /// salvage. Only refusals, transport failures and output with nothing
    /// recoverable surface as errors.
    pub async fn analyze(
        &self,
        provider: &dyn Provider,
        image: InlineImage,
        kind: TaskKind,
    ) -> Result<CanonicalResult, InferenceError> {
        let request = ProviderRequest::text(analysis_prompt(kind), ANALYSIS_MAX_OUTPUT_TOKENS)
            .with_image(image)
            .with_schema(response_schema(kind));

        let response = provider.generate(&request).await?;
        check_refusal(&response)?;

        let first_text = extract_all_text(&response);
        if let Some(result) = accepted(judge(&first_text, kind)) {
            return Ok(result);
        }

        // Every non-empty text seen so far, newest last; salvage tries them all.
        let mut seen: Vec<String> = Vec::new();
        if !first_text.trim().is_empty() {
            seen.push(first_text);
        }

        for round in 1..=self.max_repair_calls {
            // Nothing to repair without prior output; a fresh attempt is needed.
            let Some(previous) = seen.last() else {
                break;
            };

            debug!(
                "Repair call {}/{} to {}",
                round,
                self.max_repair_calls,
                provider.name()
            );
            let repair = ProviderRequest::text(repair_prompt(previous, kind), REPAIR_MAX_OUTPUT_TOKENS)
                .with_schema(response_schema(kind))
                .with_temperature(0.0);

            let response = match provider.generate(&repair).await {
                Ok(response) => response,
                Err(err) => {
                    warn!("Repair call to {} failed: {}", provider.name(), err);
                    break;
                }
            };
            check_refusal(&response)?;

            let text = extract_all_text(&response);
            if let Some(result) = accepted(judge(&text, kind)) {
                info!("Repair call {} produced a usable result", round);
                return Ok(result);
            }
            if !text.trim().is_empty() {
                seen.push(text);
            }
        }

        if let Some(result) = seen.iter().find_map(|text| salvage(text)) {
            warn!("Falling back to salvaged output from {}", provider.name());
            return Ok(result);
        }

        if seen.is_empty() {
            return Err(InferenceError::Empty);
        }
        Err(InferenceError::BadResponse(format!(
            "No usable nutrition data after {} repair call(s): {}",
            self.max_repair_calls,
            preview(&seen[0])
        )))
    }
}

/// Parse, normalize and gate one round of output.
fn judge(text: &str, kind: TaskKind) -> GateVerdict {
    let candidate = parse_lenient(text).map(|object| normalize(&object));
    evaluate(candidate, text, kind)
}

fn accepted(verdict: GateVerdict) -> Option<CanonicalResult> {
    match verdict {
        GateVerdict::Accept(result) => Some(result),
        GateVerdict::Empty(result) => {
            let detected = result.has_warning(ResultWarning::NoFoodDetected)
                || result.has_warning(ResultWarning::NoLabelDetected);
            debug!("Model reported nothing to analyze (detected={})", detected);
            Some(result)
        }
        GateVerdict::Uninformative => None,
    }
}

fn check_refusal(response: &ProviderResponse) -> Result<(), InferenceError> {
    match &response.refusal {
        Some(reason) => {
            warn!("{} refused the request: {}", response.model, reason);
            Err(InferenceError::Refused {
                reason: reason.clone(),
            })
        }
        None => Ok(()),
    }
}

fn analysis_prompt(kind: TaskKind) -> String {
    let task = match kind {
        TaskKind::Meal => MEAL_PROMPT,
        TaskKind::Label => LABEL_PROMPT,
    };
    format!("{task}\n\n{OUTPUT_CONTRACT}")
}

fn repair_prompt(previous: &str, kind: TaskKind) -> String {
    let quoted: String = previous.chars().take(REPAIR_QUOTE_MAX_CHARS).collect();
    let subject = match kind {
        TaskKind::Meal => "meal photo",
        TaskKind::Label => "nutrition label",
    };
    format!(
        "Your previous answer about a {subject} was malformed, truncated or had every nutrient \
missing. Do not re-analyze anything. Fix and complete the answer below using only what it \
already states; use null where a value is unknown.\n\n{OUTPUT_CONTRACT}\n\nPrevious answer:\n{quoted}"
    )
}

fn preview(text: &str) -> String {
    const PREVIEW_CHARS: usize = 120;
    let trimmed = text.trim();
    if trimmed.chars().count() <= PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(PREVIEW_CHARS).collect();
    cut.push('…');
    cut
}

/// Structured-output schema for the answer object.
pub fn response_schema(kind: TaskKind) -> Value {
    let nullable_number = json!({"type": "number", "nullable": true});
    let warning_values: Vec<&str> = ResultWarning::ALL
        .iter()
        .filter(|warning| **warning != ResultWarning::SalvagedOutput)
        .map(|warning| warning.as_str())
        .collect();
    let mut properties = json!({
        "foodName": {"type": "string", "nullable": true},
        "quantity": {
            "type": "object",
            "properties": {
                "value": {"type": "number"},
                "unit": {"type": "string", "enum": ["SERVING", "GRAM", "MILLILITER", "PIECE"]}
            },
            "required": ["value", "unit"]
        },
        "nutrients": {
            "type": "object",
            "properties": {
                "caloriesKcal": nullable_number,
                "proteinG": nullable_number,
                "carbsG": nullable_number,
                "fatG": nullable_number,
                "fiberG": nullable_number,
                "sugarG": nullable_number,
                "sodiumMg": nullable_number
            }
        },
        "confidence": {"type": "number"},
        "warnings": {
            "type": "array",
            "items": {"type": "string", "enum": warning_values}
        }
    });

    if kind == TaskKind::Label
        && let Some(map) = properties.as_object_mut()
    {
        map.insert(
            "labelMeta".to_string(),
            json!({
                "type": "object",
                "nullable": true,
                "properties": {
                    "servingsPerContainer": {"type": "number", "nullable": true},
                    "basis": {
                        "type": "string",
                        "enum": ["PER_SERVING", "PER_100G", "PER_100ML", "PER_PACKAGE"]
                    }
                }
            }),
        );
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": ["foodName", "nutrients", "warnings"]
    })
}
