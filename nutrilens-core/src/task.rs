//! Inference task kinds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What an inference task is asked to read from its image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    /// A photo of a meal; the model estimates portion and nutrients.
    Meal,
    /// A photo of a packaged-food nutrition label.
    Label,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Meal => "MEAL",
            TaskKind::Label => "LABEL",
        }
    }

    /// Whether a final-attempt bad response may degrade into a
    /// low-confidence result instead of failing the food log.
    pub fn tolerates_degradation(self) -> bool {
        matches!(self, TaskKind::Label)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MEAL" => Ok(TaskKind::Meal),
            "LABEL" => Ok(TaskKind::Label),
            _ => Err(format!("invalid task kind: {s}")),
        }
    }
}
