//! Last-resort extraction from output that never parsed.

use std::sync::LazyLock;

use nutrilens_core::{CanonicalResult, NutrientField, ResultWarning};
use regex::Regex;

/// Confidence attached to anything recovered by salvage.
const SALVAGE_CONFIDENCE: f64 = 0.2;

static FOOD_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)"?(?:food_?name|name|dish)"?\s*[:=]\s*"([^"\n]{1,80})""#)
        .expect("static regex")
});

/// `<marker> [":=] <number> [unit]`, markers per nutrient in several languages.
static MARKERS: LazyLock<Vec<(NutrientField, Regex)>> = LazyLock::new(|| {
    let number = r#"["']?\s*[:=]?\s*(-?\d+(?:[.,]\d+)?)\s*(kcal|kj|mg|g)?"#;
    [
        (
            NutrientField::CaloriesKcal,
            r"calories_?(?:kcal)?|energy|열량|칼로리|kalorien|energie|calorías",
        ),
        (
            NutrientField::ProteinG,
            r"protein_?(?:g)?|단백질|eiwei(?:ß|ss)|proteínas?",
        ),
        (
            NutrientField::CarbsG,
            r"carbs_?(?:g)?|carbohydrates?|탄수화물|kohlenhydrate|carbohidratos",
        ),
        (NutrientField::FatG, r"fat_?(?:g)?|total fat|지방|fett|grasas?"),
        (
            NutrientField::SugarG,
            r"sugars?_?(?:g)?|당류|zucker|azúcares",
        ),
        (
            NutrientField::FiberG,
            r"fib(?:er|re)_?(?:g)?|dietary fiber|식이섬유|ballaststoffe|fibra",
        ),
        (
            NutrientField::SodiumMg,
            r"sodium_?(?:mg)?|나트륨|natrium|sodio|\bna\b",
        ),
    ]
    .into_iter()
    .map(|(field, markers)| {
        let pattern = format!(r"(?i)(?:{markers}){number}");
        (field, Regex::new(&pattern).expect("static regex"))
    })
    .collect()
});

/// Calories written as `<number> kcal` with no marker.
static BARE_KCAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+(?:[.,]\d+)?)\s*kcal").expect("static regex"));

/// Recover a low-confidence result from free text, or `None` if nothing useful is there.
pub fn salvage(raw_text: &str) -> Option<CanonicalResult> {
    let mut result = CanonicalResult::empty();

    result.food_name = FOOD_NAME
        .captures(raw_text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty());

    for (field, regex) in MARKERS.iter() {
        let value = regex
            .captures(raw_text)
            .and_then(|c| {
                let amount = parse_decimal(c.get(1)?.as_str())?;
                let unit = c.get(2).map(|m| m.as_str().to_ascii_lowercase());
                Some(to_canonical(*field, amount, unit.as_deref()))
            });
        result.nutrients.set(*field, value);
    }

    if result.nutrients.calories_kcal.is_none() {
        let bare = BARE_KCAL
            .captures(raw_text)
            .and_then(|c| parse_decimal(c.get(1)?.as_str()));
        result.nutrients.set(NutrientField::CaloriesKcal, bare);
    }

    if result.food_name.is_none() && result.nutrients.all_null() {
        return None;
    }

    result.set_confidence(Some(SALVAGE_CONFIDENCE));
    result.add_warning(ResultWarning::SalvagedOutput);
    result.add_warning(ResultWarning::LowConfidence);
    if result.nutrients.present_count() < NutrientField::ALL.len() {
        result.add_warning(ResultWarning::PartialNutrients);
    }
    Some(result)
}

fn parse_decimal(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse().ok()
}

fn to_canonical(field: NutrientField, amount: f64, unit: Option<&str>) -> f64 {
    let value = match (field, unit) {
        (NutrientField::SodiumMg, Some("g")) => amount * 1000.0,
        (NutrientField::CaloriesKcal, Some("kj")) => amount / 4.184,
        (NutrientField::CaloriesKcal | NutrientField::SodiumMg, _) => amount,
        (_, Some("mg")) => amount / 1000.0,
        _ => amount,
    };
    (value * 100.0).round() / 100.0
}
