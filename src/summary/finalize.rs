//! Raw summary -> display summary

use std::collections::BTreeMap;

use tracing::trace;

use super::{
    FinalizedGradeSummary, FinalizedSection, Percent, RawGradeSummary, RawScore, ScoreValue,
    SectionBreakdown,
};
use crate::providers::LetterGradeLookup;

/// Attaches letter grades and score descriptions to raw grade summaries
pub struct SummaryPostProcessor<'a> {
    lookup: &'a dyn LetterGradeLookup,
}

impl<'a> SummaryPostProcessor<'a> {
    pub fn new(lookup: &'a dyn LetterGradeLookup) -> Self {
        Self { lookup }
    }

    pub fn finalize(
        &self,
        raw: RawGradeSummary,
        ordered_cutoffs: &[(String, f64)],
    ) -> FinalizedGradeSummary {
        let current_letter_grade = self.lookup.lookup(raw.current_percent, ordered_cutoffs);
        let total_letter_grade = self.lookup.lookup(raw.percent, ordered_cutoffs);

        let section_breakdown = raw
            .section_breakdown
            .into_iter()
            .map(|section| {
                let (score_earned, score_possible) = reconstruct_scores(&section, &raw.totaled_scores);
                self.finalize_section(section, score_earned, score_possible, ordered_cutoffs)
            })
            .collect();

        FinalizedGradeSummary {
            percent: raw.percent,
            current_percent: raw.current_percent,
            grade: raw.grade,
            grade_breakdown: raw.grade_breakdown,
            current_letter_grade,
            total_letter_grade,
            section_breakdown,
            manual_graded_total_count: raw.manual_graded_total_count,
            extra: raw.extra,
        }
    }

    fn finalize_section(
        &self,
        section: SectionBreakdown,
        score_earned: ScoreValue,
        score_possible: ScoreValue,
        ordered_cutoffs: &[(String, f64)],
    ) -> FinalizedSection {
        let (displayed_value, letter_grade) = match &section.percent {
            Percent::Display(text) => (text.clone(), None),
            Percent::Numeric(p) => {
                let displayed = section
                    .displayed_value
                    .clone()
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| format!("{:.2}%", 100.0 * p));
                let letter = if *p > 0.0 {
                    self.lookup.lookup(*p, ordered_cutoffs)
                } else {
                    None
                };
                (displayed, letter)
            }
        };

        let grade_description = describe(&score_earned, &score_possible);

        FinalizedSection {
            category: section.category,
            detail: section.detail,
            label: section.label,
            percent: section.percent,
            displayed_value,
            letter_grade,
            score_earned,
            score_possible,
            grade_description,
            extra: section.extra,
        }
    }
}

/// Earned/possible for a section, recovered from its `detail` label.
///
/// `Exam 2 = 0%` names a whole category, so the category's raw scores are
/// summed. `Homework 3 - 50% (5/10)` names one assessment and carries its
/// score in the trailing token. Anything else uses the stored fields.
fn reconstruct_scores(
    section: &SectionBreakdown,
    totaled_scores: &BTreeMap<String, Vec<RawScore>>,
) -> (ScoreValue, ScoreValue) {
    if section.detail.contains('=') {
        let (earned, possible) = totaled_scores
            .get(&section.category)
            .map(|scores| {
                scores
                    .iter()
                    .fold((0.0, 0.0), |(e, p), s| (e + s.earned, p + s.possible))
            })
            .unwrap_or((0.0, 0.0));
        return (ScoreValue::Number(earned), ScoreValue::Number(possible));
    }

    if section.detail.contains('-') {
        if let Some(scores) = parse_label_score(&section.detail) {
            return scores;
        }
        trace!(detail = %section.detail, "Unparseable score label, using stored scores");
    }

    (
        section.score_earned.clone().unwrap_or_default(),
        section.score_possible.clone().unwrap_or_default(),
    )
}

/// `... (earned/possible)` -> (earned, possible)
fn parse_label_score(detail: &str) -> Option<(ScoreValue, ScoreValue)> {
    let token = detail.rsplit(' ').next()?;
    let earned = token.split_once('(')?.1.split('/').next()?;
    let possible = token.split(')').next()?.split('/').nth(1)?;
    Some((ScoreValue::from_label(earned), ScoreValue::from_label(possible)))
}

fn describe(earned: &ScoreValue, possible: &ScoreValue) -> String {
    match (earned.as_f64(), possible.as_f64()) {
        (Some(e), Some(p)) => format!("({:.2}/{:.2})", e, p),
        _ => format!("({}/{})", earned, possible),
    }
}
