//! Post-processing applied to successful results.

use nutrilens_core::{CanonicalResult, NutrientField, ResultWarning, TaskKind};
use tracing::debug;

/// Below this the result is flagged `LOW_CONFIDENCE`.
const LOW_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Relative gap between stated and macro-derived energy that is tolerated.
const ENERGY_TOLERANCE: f64 = 0.35;

/// Calories under this are too small to compare against macros.
const MIN_COMPARABLE_KCAL: f64 = 50.0;

/// Step run on every successful result before it is stored.
///
/// May add warnings; must leave nutrient values untouched.
pub trait PostProcessor: Send + Sync {
    fn apply(&self, result: CanonicalResult, provider_code: &str, kind: TaskKind)
    -> CanonicalResult;
}

/// Flags incomplete or implausible results.
#[derive(Debug, Clone, Copy, Default)]
pub struct SanityPostProcessor;

impl PostProcessor for SanityPostProcessor {
    fn apply(
        &self,
        mut result: CanonicalResult,
        provider_code: &str,
        kind: TaskKind,
    ) -> CanonicalResult {
        let nothing_to_check = result.has_warning(ResultWarning::NoFoodDetected)
            || result.has_warning(ResultWarning::NoLabelDetected);
        if nothing_to_check {
            return result;
        }

        let present = result.nutrients.present_count();
        if present > 0 && present < NutrientField::ALL.len() {
            result.add_warning(ResultWarning::PartialNutrients);
        }

        if result
            .confidence
            .is_some_and(|confidence| confidence < LOW_CONFIDENCE_THRESHOLD)
        {
            result.add_warning(ResultWarning::LowConfidence);
        }

        if energy_mismatch(&result) {
            debug!(
                "Energy mismatch in {} result from '{}'",
                kind, provider_code
            );
            result.add_warning(ResultWarning::LowConfidence);
        }

        result
    }
}

fn energy_mismatch(result: &CanonicalResult) -> bool {
    let n = &result.nutrients;
    let (Some(kcal), Some(protein), Some(carbs), Some(fat)) =
        (n.calories_kcal, n.protein_g, n.carbs_g, n.fat_g)
    else {
        return false;
    };
    if kcal < MIN_COMPARABLE_KCAL {
        return false;
    }
    let derived = protein * 4.0 + carbs * 4.0 + fat * 9.0;
    (derived - kcal).abs() / kcal.max(derived) > ENERGY_TOLERANCE
}
