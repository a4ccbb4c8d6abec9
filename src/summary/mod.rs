//! Grade summary post-processing
//!
//! The grading engine hands back a raw summary per student: overall percent,
//! a per-section breakdown with free-text `detail` labels, and the raw scores
//! per category. This module turns that into what a gradebook view shows:
//! letter grades, display values and `(earned/possible)` descriptions.

pub mod letter_grades;
pub mod finalize;
pub mod cohort;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use cohort::{
    assemble_cohort, promote_richest_entry, FinalizedGradebookEntry, GradebookEntry, RichestEntry,
};
pub use finalize::SummaryPostProcessor;
pub use letter_grades::{ordered_cutoffs, CutoffTable};

/// A section percentage: either a number or text the engine already formatted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Percent {
    Numeric(f64),
    Display(String),
}

/// An earned or possible score as shown to users. Labels like `(?/?)` carry
/// placeholders instead of numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScoreValue {
    Number(f64),
    Text(String),
}

impl ScoreValue {
    /// Numeric when the text parses as a float
    pub fn from_label(text: &str) -> Self {
        match text.trim().parse::<f64>() {
            Ok(n) => ScoreValue::Number(n),
            Err(_) => ScoreValue::Text(text.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScoreValue::Number(n) => Some(*n),
            ScoreValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl Default for ScoreValue {
    fn default() -> Self {
        ScoreValue::Number(0.0)
    }
}

impl fmt::Display for ScoreValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreValue::Number(n) => write!(f, "{}", n),
            ScoreValue::Text(s) => f.write_str(s),
        }
    }
}

/// One raw assessment score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawScore {
    pub earned: f64,
    pub possible: f64,
}

/// One row of the engine's section breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionBreakdown {
    pub category: String,
    pub detail: String,
    #[serde(default)]
    pub label: String,
    pub percent: Percent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub displayed_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_earned: Option<ScoreValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_possible: Option<ScoreValue>,
    /// Engine fields this crate doesn't interpret (module ids, comments, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Raw grade summary for one student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawGradeSummary {
    pub percent: f64,
    pub current_percent: f64,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub grade_breakdown: Vec<Value>,
    #[serde(default)]
    pub section_breakdown: Vec<SectionBreakdown>,
    #[serde(default)]
    pub totaled_scores: BTreeMap<String, Vec<RawScore>>,
    #[serde(default)]
    pub manual_graded_total_count: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Section ready for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalizedSection {
    pub category: String,
    pub detail: String,
    pub label: String,
    pub percent: Percent,
    pub displayed_value: String,
    pub letter_grade: Option<String>,
    pub score_earned: ScoreValue,
    pub score_possible: ScoreValue,
    pub grade_description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Grade summary ready for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalizedGradeSummary {
    pub percent: f64,
    pub current_percent: f64,
    pub grade: Option<String>,
    pub grade_breakdown: Vec<Value>,
    pub current_letter_grade: Option<String>,
    pub total_letter_grade: Option<String>,
    pub section_breakdown: Vec<FinalizedSection>,
    pub manual_graded_total_count: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
