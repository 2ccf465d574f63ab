//! Canonical nutrition result produced by the inference pipeline.
//!
//! Every numeric nutrient is either a finite non-negative number or `None`.
//! Constructors and setters enforce this so callers never see negative or
//! non-finite values.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unit attached to a [`Quantity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuantityUnit {
    #[default]
    Serving,
    Gram,
    Milliliter,
    Piece,
}

impl QuantityUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Serving => "SERVING",
            Self::Gram => "GRAM",
            Self::Milliliter => "MILLILITER",
            Self::Piece => "PIECE",
        }
    }

    /// Lenient parse accepting the abbreviations models tend to emit.
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "serving" | "servings" | "portion" | "인분" => Some(Self::Serving),
            "g" | "gram" | "grams" => Some(Self::Gram),
            "ml" | "milliliter" | "milliliters" | "millilitre" => Some(Self::Milliliter),
            "piece" | "pieces" | "pcs" | "pc" | "ea" | "개" => Some(Self::Piece),
            _ => None,
        }
    }
}

impl fmt::Display for QuantityUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Amount of food the nutrients refer to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: QuantityUnit,
}

impl Quantity {
    pub fn one_serving() -> Self {
        Self {
            value: 1.0,
            unit: QuantityUnit::Serving,
        }
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Self::one_serving()
    }
}

/// The seven tracked nutrient fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NutrientField {
    CaloriesKcal,
    ProteinG,
    CarbsG,
    FatG,
    FiberG,
    SugarG,
    SodiumMg,
}

impl NutrientField {
    pub const ALL: [NutrientField; 7] = [
        NutrientField::CaloriesKcal,
        NutrientField::ProteinG,
        NutrientField::CarbsG,
        NutrientField::FatG,
        NutrientField::FiberG,
        NutrientField::SugarG,
        NutrientField::SodiumMg,
    ];

    /// Canonical JSON key.
    pub fn key(self) -> &'static str {
        match self {
            Self::CaloriesKcal => "caloriesKcal",
            Self::ProteinG => "proteinG",
            Self::CarbsG => "carbsG",
            Self::FatG => "fatG",
            Self::FiberG => "fiberG",
            Self::SugarG => "sugarG",
            Self::SodiumMg => "sodiumMg",
        }
    }
}

/// Nutrient values. `None` means "unknown", never zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nutrients {
    pub calories_kcal: Option<f64>,
    pub protein_g: Option<f64>,
    pub carbs_g: Option<f64>,
    pub fat_g: Option<f64>,
    pub fiber_g: Option<f64>,
    pub sugar_g: Option<f64>,
    pub sodium_mg: Option<f64>,
}

impl Nutrients {
    pub fn get(&self, field: NutrientField) -> Option<f64> {
        match field {
            NutrientField::CaloriesKcal => self.calories_kcal,
            NutrientField::ProteinG => self.protein_g,
            NutrientField::CarbsG => self.carbs_g,
            NutrientField::FatG => self.fat_g,
            NutrientField::FiberG => self.fiber_g,
            NutrientField::SugarG => self.sugar_g,
            NutrientField::SodiumMg => self.sodium_mg,
        }
    }

    /// Set a field, dropping negative or non-finite values to `None`.
    pub fn set(&mut self, field: NutrientField, value: Option<f64>) {
        let value = value.filter(|v| v.is_finite() && *v >= 0.0);
        let slot = match field {
            NutrientField::CaloriesKcal => &mut self.calories_kcal,
            NutrientField::ProteinG => &mut self.protein_g,
            NutrientField::CarbsG => &mut self.carbs_g,
            NutrientField::FatG => &mut self.fat_g,
            NutrientField::FiberG => &mut self.fiber_g,
            NutrientField::SugarG => &mut self.sugar_g,
            NutrientField::SodiumMg => &mut self.sodium_mg,
        };
        *slot = value;
    }

    pub fn all_null(&self) -> bool {
        NutrientField::ALL.iter().all(|f| self.get(*f).is_none())
    }

    pub fn present_count(&self) -> usize {
        NutrientField::ALL
            .iter()
            .filter(|f| self.get(**f).is_some())
            .count()
    }

    /// Multiply every present value by `factor`.
    pub fn scale(&mut self, factor: f64) {
        for field in NutrientField::ALL {
            let scaled = self.get(field).map(|v| round_to(v * factor, 2));
            self.set(field, scaled);
        }
    }
}

/// Closed set of warnings a result may carry. Unknown tokens are dropped
/// during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultWarning {
    NoFoodDetected,
    NoLabelDetected,
    LowConfidence,
    PortionEstimated,
    MultipleItems,
    PartialNutrients,
    BlurryImage,
    SalvagedOutput,
}

impl ResultWarning {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoFoodDetected => "NO_FOOD_DETECTED",
            Self::NoLabelDetected => "NO_LABEL_DETECTED",
            Self::LowConfidence => "LOW_CONFIDENCE",
            Self::PortionEstimated => "PORTION_ESTIMATED",
            Self::MultipleItems => "MULTIPLE_ITEMS",
            Self::PartialNutrients => "PARTIAL_NUTRIENTS",
            Self::BlurryImage => "BLURRY_IMAGE",
            Self::SalvagedOutput => "SALVAGED_OUTPUT",
        }
    }

    pub const ALL: [ResultWarning; 8] = [
        ResultWarning::NoFoodDetected,
        ResultWarning::NoLabelDetected,
        ResultWarning::LowConfidence,
        ResultWarning::PortionEstimated,
        ResultWarning::MultipleItems,
        ResultWarning::PartialNutrients,
        ResultWarning::BlurryImage,
        ResultWarning::SalvagedOutput,
    ];
}

impl fmt::Display for ResultWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultWarning {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|w| w.as_str() == normalized)
            .ok_or_else(|| format!("unknown warning: {s}"))
    }
}

/// What the label's nutrient numbers refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LabelBasis {
    PerServing,
    #[serde(rename = "PER_100G")]
    Per100g,
    #[serde(rename = "PER_100ML")]
    Per100ml,
    PerPackage,
}

impl LabelBasis {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PerServing => "PER_SERVING",
            Self::Per100g => "PER_100G",
            Self::Per100ml => "PER_100ML",
            Self::PerPackage => "PER_PACKAGE",
        }
    }
}

impl FromStr for LabelBasis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace(['-', ' '], "_").as_str() {
            "PER_SERVING" | "SERVING" => Ok(Self::PerServing),
            "PER_100G" | "100G" => Ok(Self::Per100g),
            "PER_100ML" | "100ML" => Ok(Self::Per100ml),
            "PER_PACKAGE" | "PACKAGE" | "PER_CONTAINER" => Ok(Self::PerPackage),
            _ => Err(format!("unknown label basis: {s}")),
        }
    }
}

/// Extra metadata read from a packaged-food nutrition label.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servings_per_container: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basis: Option<LabelBasis>,
}

/// Normalized, schema-valid inference output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalResult {
    pub food_name: Option<String>,
    pub quantity: Quantity,
    pub nutrients: Nutrients,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub warnings: Vec<ResultWarning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_meta: Option<LabelMeta>,
}

impl CanonicalResult {
    pub fn empty() -> Self {
        Self {
            food_name: None,
            quantity: Quantity::one_serving(),
            nutrients: Nutrients::default(),
            confidence: None,
            warnings: Vec::new(),
            label_meta: None,
        }
    }

    /// Terminal result for a photo that contains no food.
    pub fn no_food() -> Self {
        let mut result = Self::empty();
        result.confidence = Some(0.0);
        result.add_warning(ResultWarning::NoFoodDetected);
        result
    }

    /// Degraded result for a label photo that could not be read.
    pub fn no_label() -> Self {
        let mut result = Self::empty();
        result.confidence = Some(0.0);
        result.add_warning(ResultWarning::NoLabelDetected);
        result.add_warning(ResultWarning::LowConfidence);
        result
    }

    pub fn add_warning(&mut self, warning: ResultWarning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    pub fn has_warning(&self, warning: ResultWarning) -> bool {
        self.warnings.contains(&warning)
    }

    /// Clamp confidence into `[0, 1]`, dropping non-finite values.
    pub fn set_confidence(&mut self, confidence: Option<f64>) {
        self.confidence = confidence
            .filter(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0));
    }
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
