//! Map a parsed model answer onto [`CanonicalResult`].
//!
//! Models disagree on key names, units and number formatting. Everything
//! here is lenient: unknown keys are ignored, unparsable values become
//! `None`, unknown warnings are dropped.

use std::sync::LazyLock;

use nutrilens_core::{
    CanonicalResult, LabelBasis, LabelMeta, NutrientField, Quantity, QuantityUnit, ResultWarning,
};
use regex::Regex;
use serde_json::{Map, Value};

const KJ_PER_KCAL: f64 = 4.184;

static NUMBER_WITH_UNIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(-?\d[\d,. ]*\d|-?\d)\s*([A-Za-zµμ%]*)").expect("static regex")
});

/// Unit a number was reported in.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Unit {
    Kcal,
    Kj,
    Gram,
    Milligram,
    Microgram,
}

impl Unit {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "kcal" | "cal" | "calories" => Some(Unit::Kcal),
            "kj" => Some(Unit::Kj),
            "g" | "gram" | "grams" => Some(Unit::Gram),
            "mg" => Some(Unit::Milligram),
            "mcg" | "ug" | "µg" | "μg" => Some(Unit::Microgram),
            _ => None,
        }
    }
}

/// Key aliases per nutrient with the unit the key implies.
fn nutrient_aliases(field: NutrientField) -> &'static [(&'static str, Unit)] {
    match field {
        NutrientField::CaloriesKcal => &[
            ("calorieskcal", Unit::Kcal),
            ("calories", Unit::Kcal),
            ("kcal", Unit::Kcal),
            ("energykcal", Unit::Kcal),
            ("energy", Unit::Kcal),
            ("energykj", Unit::Kj),
            ("kilojoules", Unit::Kj),
            ("kj", Unit::Kj),
        ],
        NutrientField::ProteinG => &[("proteing", Unit::Gram), ("protein", Unit::Gram)],
        NutrientField::CarbsG => &[
            ("carbsg", Unit::Gram),
            ("carbs", Unit::Gram),
            ("carbohydrates", Unit::Gram),
            ("carbohydrate", Unit::Gram),
            ("carbohydratesg", Unit::Gram),
        ],
        NutrientField::FatG => &[
            ("fatg", Unit::Gram),
            ("fat", Unit::Gram),
            ("totalfat", Unit::Gram),
            ("totalfatg", Unit::Gram),
        ],
        NutrientField::FiberG => &[
            ("fiberg", Unit::Gram),
            ("fiber", Unit::Gram),
            ("fibre", Unit::Gram),
            ("dietaryfiber", Unit::Gram),
        ],
        NutrientField::SugarG => &[
            ("sugarg", Unit::Gram),
            ("sugar", Unit::Gram),
            ("sugars", Unit::Gram),
            ("sugarsg", Unit::Gram),
            ("totalsugars", Unit::Gram),
        ],
        NutrientField::SodiumMg => &[
            ("sodiummg", Unit::Milligram),
            ("sodium", Unit::Milligram),
            ("sodiumg", Unit::Gram),
        ],
    }
}

/// Unit each canonical field is stored in.
fn canonical_unit(field: NutrientField) -> Unit {
    match field {
        NutrientField::CaloriesKcal => Unit::Kcal,
        NutrientField::SodiumMg => Unit::Milligram,
        _ => Unit::Gram,
    }
}

/// Lowercase and drop separators so `food_name`, `foodName` and `Food Name` match.
fn fold_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn lookup<'a>(map: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    map.iter()
        .find(|(key, value)| !value.is_null() && aliases.contains(&fold_key(key).as_str()))
        .map(|(_, value)| value)
}

/// Build the canonical result from a parsed answer object.
pub fn normalize(raw: &Map<String, Value>) -> CanonicalResult {
    let mut result = CanonicalResult::empty();

    result.food_name = lookup(raw, &["foodname", "name", "food", "dish", "productname"])
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    result.quantity = lookup(raw, &["quantity", "portion", "serving", "servingsize"])
        .and_then(parse_quantity)
        .unwrap_or_else(Quantity::one_serving);

    let nutrients_map = lookup(
        raw,
        &["nutrients", "nutrition", "nutritionfacts", "nutritioninfo"],
    )
    .and_then(Value::as_object)
    .unwrap_or(raw);

    for field in NutrientField::ALL {
        let value = nutrient_aliases(field).iter().find_map(|(alias, implied)| {
            nutrients_map
                .iter()
                .find(|(key, value)| !value.is_null() && fold_key(key) == *alias)
                .map(|(_, value)| coerce_amount(value, *implied, field))
        });
        let value = value.flatten().map(round2);
        result.nutrients.set(field, value);
    }

    let confidence =
        lookup(raw, &["confidence", "confidencescore", "score"]).and_then(parse_confidence);
    result.set_confidence(confidence);

    if let Some(Value::Array(warnings)) = lookup(raw, &["warnings", "flags"]) {
        for warning in warnings
            .iter()
            .filter_map(Value::as_str)
            .filter_map(|w| w.parse::<ResultWarning>().ok())
        {
            result.add_warning(warning);
        }
    }

    result.label_meta = lookup(raw, &["labelmeta", "label", "labelinfo"])
        .and_then(Value::as_object)
        .map(parse_label_meta);

    scale_whole_package(&mut result);

    result
}

/// Convert a per-serving label with several servings into whole-package values.
fn scale_whole_package(result: &mut CanonicalResult) {
    let Some(meta) = result.label_meta.as_mut() else {
        return;
    };
    let Some(servings) = meta.servings_per_container else {
        return;
    };
    if meta.basis != Some(LabelBasis::PerServing) || servings <= 1.0 {
        return;
    }

    result.nutrients.scale(servings);
    result.quantity = Quantity::one_serving();
    meta.basis = Some(LabelBasis::PerPackage);
}

fn parse_label_meta(raw: &Map<String, Value>) -> LabelMeta {
    let servings_per_container = lookup(
        raw,
        &["servingspercontainer", "servingsperpackage", "servings"],
    )
    .and_then(parse_number)
    .map(|(value, _)| value)
    .filter(|v| v.is_finite() && *v > 0.0);

    let basis = lookup(raw, &["basis", "nutrientbasis"])
        .and_then(Value::as_str)
        .and_then(|b| b.parse::<LabelBasis>().ok());

    LabelMeta {
        servings_per_container,
        basis,
    }
}

fn parse_quantity(value: &Value) -> Option<Quantity> {
    match value {
        Value::Object(map) => {
            let amount = lookup(map, &["value", "amount"])
                .and_then(parse_number)
                .map(|(v, _)| v)
                .filter(|v| v.is_finite() && *v > 0.0);
            let unit = lookup(map, &["unit"])
                .and_then(Value::as_str)
                .and_then(QuantityUnit::parse_lenient);
            Some(Quantity {
                value: amount.unwrap_or(1.0),
                unit: unit.unwrap_or_default(),
            })
        }
        Value::Number(_) | Value::String(_) => {
            let (amount, suffix) = parse_number(value)?;
            if !(amount.is_finite() && amount > 0.0) {
                return None;
            }
            Some(Quantity {
                value: amount,
                unit: suffix
                    .as_deref()
                    .and_then(QuantityUnit::parse_lenient)
                    .unwrap_or_default(),
            })
        }
        _ => None,
    }
}

fn parse_confidence(value: &Value) -> Option<f64> {
    let (confidence, suffix) = parse_number(value)?;
    if suffix.as_deref() == Some("%") || (confidence > 1.0 && confidence <= 100.0) {
        return Some(confidence / 100.0);
    }
    (0.0..=1.0).contains(&confidence).then_some(confidence)
}

/// Coerce a nutrient amount into the field's canonical unit.
fn coerce_amount(value: &Value, implied: Unit, field: NutrientField) -> Option<f64> {
    let (amount, unit) = match value {
        Value::Object(map) => {
            let amount = lookup(map, &["value", "amount"]).and_then(parse_number)?.0;
            let unit = lookup(map, &["unit"])
                .and_then(Value::as_str)
                .and_then(Unit::parse);
            (amount, unit)
        }
        other => {
            let (amount, suffix) = parse_number(other)?;
            (amount, suffix.as_deref().and_then(Unit::parse))
        }
    };

    if amount < 0.0 {
        return None;
    }

    Some(convert(amount, unit.unwrap_or(implied), canonical_unit(field)))
}

fn convert(amount: f64, from: Unit, to: Unit) -> f64 {
    match (from, to) {
        (a, b) if a == b => amount,
        (Unit::Kj, Unit::Kcal) => amount / KJ_PER_KCAL,
        (Unit::Gram, Unit::Milligram) => amount * 1000.0,
        (Unit::Microgram, Unit::Milligram) => amount / 1000.0,
        (Unit::Milligram, Unit::Gram) => amount / 1000.0,
        (Unit::Microgram, Unit::Gram) => amount / 1_000_000.0,
        // Energy units on a mass field (or the reverse) mean the model
        // mislabeled the unit; keep the number.
        _ => amount,
    }
}

/// Parse a JSON number or a string like `"1,200 mg"` / `"12.5g"` / `"85%"`.
fn parse_number(value: &Value) -> Option<(f64, Option<String>)> {
    match value {
        Value::Number(n) => n.as_f64().map(|v| (v, None)),
        Value::String(s) => {
            let captures = NUMBER_WITH_UNIT.captures(s)?;
            let digits = captures.get(1)?.as_str();
            let number = parse_digits(digits)?;
            let suffix = captures
                .get(2)
                .map(|m| m.as_str().to_string())
                .filter(|s| !s.is_empty());
            Some((number, suffix))
        }
        _ => None,
    }
}

/// Handle thousands separators and decimal commas.
fn parse_digits(raw: &str) -> Option<f64> {
    let compact: String = raw.chars().filter(|c| *c != ' ').collect();
    let normalized = if compact.contains('.') && compact.contains(',') {
        compact.replace(',', "")
    } else if compact.contains(',') {
        let is_thousands = compact
            .trim_start_matches('-')
            .split(',')
            .skip(1)
            .all(|group| group.len() == 3);
        if is_thousands {
            compact.replace(',', "")
        } else {
            compact.replace(',', ".")
        }
    } else {
        compact
    };
    normalized.parse::<f64>().ok()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalize_json(value: Value) -> CanonicalResult {
        normalize(value.as_object().unwrap())
    }

    #[test]
    fn canonical_answer_maps_directly() {
        let result = normalize_json(json!({
            "foodName": "Bibimbap",
            "quantity": {"value": 1, "unit": "SERVING"},
            "nutrients": {
                "caloriesKcal": 560, "proteinG": 22, "carbsG": 80,
                "fatG": 15, "fiberG": 6, "sugarG": 9, "sodiumMg": 900
            },
            "confidence": 0.8,
            "warnings": ["PORTION_ESTIMATED"]
        }));

        assert_eq!(result.food_name.as_deref(), Some("Bibimbap"));
        assert_eq!(result.nutrients.present_count(), 7);
        assert_eq!(result.nutrients.sodium_mg, Some(900.0));
        assert_eq!(result.confidence, Some(0.8));
        assert_eq!(result.warnings, vec![ResultWarning::PortionEstimated]);
    }

    #[test]
    fn aliases_and_unit_strings_are_coerced() {
        let result = normalize_json(json!({
            "food_name": "Ramen",
            "nutrition": {
                "calories": "1,200 kJ",
                "protein": "12.5g",
                "sodium": "1.2 g",
                "sugars": "500 mg",
                "Total Fat": "7,5"
            }
        }));

        assert_eq!(result.food_name.as_deref(), Some("Ramen"));
        assert_eq!(result.nutrients.calories_kcal, Some(286.81));
        assert_eq!(result.nutrients.protein_g, Some(12.5));
        assert_eq!(result.nutrients.sodium_mg, Some(1200.0));
        assert_eq!(result.nutrients.sugar_g, Some(0.5));
        assert_eq!(result.nutrients.fat_g, Some(7.5));
    }

    #[test]
    fn energy_kj_key_converts() {
        let result = normalize_json(json!({"nutrients": {"energyKj": 418.4}}));
        assert_eq!(result.nutrients.calories_kcal, Some(100.0));
    }

    #[test]
    fn negatives_and_garbage_become_null() {
        let result = normalize_json(json!({
            "nutrients": {"caloriesKcal": -5, "proteinG": "unknown", "fatG": null, "carbsG": true}
        }));
        assert!(result.nutrients.all_null());
    }

    #[test]
    fn flat_nutrients_at_top_level() {
        let result = normalize_json(json!({"foodName": "x", "caloriesKcal": 100, "sodiumMg": 20}));
        assert_eq!(result.nutrients.calories_kcal, Some(100.0));
        assert_eq!(result.nutrients.sodium_mg, Some(20.0));
    }

    #[test]
    fn quantity_defaults_to_one_serving() {
        assert_eq!(normalize_json(json!({})).quantity, Quantity::one_serving());
        assert_eq!(
            normalize_json(json!({"quantity": {"value": null}})).quantity,
            Quantity::one_serving()
        );

        let grams = normalize_json(json!({"quantity": "250 g"})).quantity;
        assert_eq!(grams.value, 250.0);
        assert_eq!(grams.unit, QuantityUnit::Gram);
    }

    #[test]
    fn confidence_percentages_are_scaled() {
        assert_eq!(normalize_json(json!({"confidence": 85})).confidence, Some(0.85));
        assert_eq!(normalize_json(json!({"confidence": "70%"})).confidence, Some(0.7));
        assert_eq!(normalize_json(json!({"confidence": 250})).confidence, None);
    }

    #[test]
    fn unknown_warnings_are_dropped() {
        let result = normalize_json(json!({
            "warnings": ["LOW_CONFIDENCE", "SPICY", "low confidence", 3, "multiple-items"]
        }));
        assert_eq!(
            result.warnings,
            vec![ResultWarning::LowConfidence, ResultWarning::MultipleItems]
        );
    }

    #[test]
    fn per_serving_label_scales_to_whole_package() {
        let result = normalize_json(json!({
            "foodName": "Crackers",
            "quantity": {"value": 30, "unit": "GRAM"},
            "nutrients": {"sodiumMg": 13, "caloriesKcal": 120.5, "sugarG": null},
            "labelMeta": {"servingsPerContainer": 10, "basis": "PER_SERVING"}
        }));

        assert_eq!(result.nutrients.sodium_mg, Some(130.0));
        assert_eq!(result.nutrients.calories_kcal, Some(1205.0));
        assert_eq!(result.nutrients.sugar_g, None);
        assert_eq!(result.quantity, Quantity::one_serving());
        assert_eq!(
            result.label_meta.unwrap().basis,
            Some(LabelBasis::PerPackage)
        );
    }

    #[test]
    fn single_serving_or_per_100g_label_is_not_scaled() {
        let single = normalize_json(json!({
            "nutrients": {"sodiumMg": 13},
            "labelMeta": {"servingsPerContainer": 1, "basis": "PER_SERVING"}
        }));
        assert_eq!(single.nutrients.sodium_mg, Some(13.0));

        let per_100g = normalize_json(json!({
            "nutrients": {"sodiumMg": 13},
            "labelMeta": {"servingsPerContainer": 4, "basis": "PER_100G"}
        }));
        assert_eq!(per_100g.nutrients.sodium_mg, Some(13.0));
        assert_eq!(per_100g.label_meta.unwrap().basis, Some(LabelBasis::Per100g));
    }

    #[test]
    fn digit_parsing() {
        assert_eq!(parse_digits("1,200"), Some(1200.0));
        assert_eq!(parse_digits("1,5"), Some(1.5));
        assert_eq!(parse_digits("1,234.5"), Some(1234.5));
        assert_eq!(parse_digits("1 200"), Some(1200.0));
    }
}
