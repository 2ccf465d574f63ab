//! Semantic quality gate over parsed output.

use nutrilens_core::{CanonicalResult, ResultWarning, TaskKind};

/// Phrases meaning "there is no food in this photo".
const NO_FOOD_MARKERS: &[&str] = &[
    "no_food_detected",
    "no food",
    "not food",
    "not a food",
    "no meal",
    "does not contain food",
    "doesn't contain food",
    "does not contain any food",
    "doesn't contain any food",
    "no edible",
    "음식이 없",
    "음식이 아닙",
    "음식을 찾을 수 없",
    "음식이 보이지 않",
    "食べ物がありません",
    "kein essen",
    "keine lebensmittel",
];

/// Phrases meaning "there is no readable nutrition label".
const NO_LABEL_MARKERS: &[&str] = &[
    "no_label_detected",
    "no label",
    "no nutrition label",
    "no nutrition facts",
    "label not found",
    "label is not visible",
    "label is unreadable",
    "unreadable",
    "not readable",
    "cannot read the label",
    "can't read the label",
    "영양성분표가 없",
    "영양정보가 없",
    "라벨이 없",
    "읽을 수 없",
];

/// What the gate decided about one round of output.
#[derive(Debug, Clone, PartialEq)]
pub enum GateVerdict {
    /// Usable result.
    Accept(CanonicalResult),
    /// The model said there is nothing to analyze; terminal, no more calls.
    Empty(CanonicalResult),
    /// Parsed (or not) but carries no information.
    Uninformative,
}

/// Judge a normalized candidate together with the raw text it came from.
pub fn evaluate(candidate: Option<CanonicalResult>, raw_text: &str, kind: TaskKind) -> GateVerdict {
    if let Some(result) = &candidate {
        if result.has_warning(ResultWarning::NoFoodDetected) && kind == TaskKind::Meal {
            return GateVerdict::Empty(CanonicalResult::no_food());
        }
        if result.has_warning(ResultWarning::NoLabelDetected) && kind == TaskKind::Label {
            return GateVerdict::Empty(CanonicalResult::no_label());
        }
    }

    if let Some(result) = candidate
        && !result.nutrients.all_null()
    {
        return GateVerdict::Accept(result);
    }

    match kind {
        TaskKind::Meal if looks_like_no_food(raw_text) => {
            GateVerdict::Empty(CanonicalResult::no_food())
        }
        TaskKind::Label if looks_like_no_label(raw_text) => {
            GateVerdict::Empty(CanonicalResult::no_label())
        }
        _ => GateVerdict::Uninformative,
    }
}

pub fn looks_like_no_food(raw_text: &str) -> bool {
    contains_marker(raw_text, NO_FOOD_MARKERS)
}

pub fn looks_like_no_label(raw_text: &str) -> bool {
    contains_marker(raw_text, NO_LABEL_MARKERS)
}

fn contains_marker(raw_text: &str, markers: &[&str]) -> bool {
    let lowered = raw_text.to_lowercase();
    markers.iter().any(|marker| lowered.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_sodium(value: f64) -> CanonicalResult {
        let mut result = CanonicalResult::empty();
        result.nutrients.sodium_mg = Some(value);
        result
    }

    #[test]
    fn informative_result_is_accepted() {
        let verdict = evaluate(Some(with_sodium(10.0)), "{}", TaskKind::Meal);
        assert_eq!(verdict, GateVerdict::Accept(with_sodium(10.0)));
    }

    #[test]
    fn all_null_is_uninformative() {
        let verdict = evaluate(Some(CanonicalResult::empty()), "{\"foodName\":\"x\"}", TaskKind::Meal);
        assert_eq!(verdict, GateVerdict::Uninformative);
        assert_eq!(evaluate(None, "", TaskKind::Label), GateVerdict::Uninformative);
    }

    #[test]
    fn no_food_text_short_circuits() {
        for text in [
            "There is no food in this image.",
            "{\"foodName\":null,\"warnings\":[\"NO_FOOD_DETECTED\"]}",
            "이 사진에는 음식이 없습니다",
        ] {
            let verdict = evaluate(None, text, TaskKind::Meal);
            assert_eq!(verdict, GateVerdict::Empty(CanonicalResult::no_food()), "{text}");
        }
    }

    #[test]
    fn no_food_warning_wins_over_numbers() {
        let mut result = with_sodium(0.0);
        result.add_warning(ResultWarning::NoFoodDetected);
        assert_eq!(
            evaluate(Some(result), "", TaskKind::Meal),
            GateVerdict::Empty(CanonicalResult::no_food())
        );
    }

    #[test]
    fn no_label_text_only_applies_to_label_tasks() {
        let text = "The nutrition label is unreadable.";
        assert_eq!(
            evaluate(None, text, TaskKind::Label),
            GateVerdict::Empty(CanonicalResult::no_label())
        );
        assert_eq!(evaluate(None, text, TaskKind::Meal), GateVerdict::Uninformative);
    }
}
