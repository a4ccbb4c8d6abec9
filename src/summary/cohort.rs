//! Course-wide gradebook assembly

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{FinalizedGradeSummary, RawGradeSummary, SummaryPostProcessor};
use crate::providers::{ManualGradingAnnotator, Student};

/// One student's row in a course gradebook, before finalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradebookEntry {
    pub username: String,
    pub full_name: String,
    pub user_id: i64,
    pub email: String,
    pub course_id: String,
    pub grade_summary: RawGradeSummary,
}

impl GradebookEntry {
    pub fn new(student: Student, course_id: impl Into<String>, grade_summary: RawGradeSummary) -> Self {
        Self {
            username: student.username,
            full_name: student.full_name,
            user_id: student.user_id,
            email: student.email,
            course_id: course_id.into(),
            grade_summary,
        }
    }
}

/// A gradebook row ready for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalizedGradebookEntry {
    pub username: String,
    pub full_name: String,
    pub user_id: i64,
    pub email: String,
    pub course_id: String,
    pub grade_summary: FinalizedGradeSummary,
}

/// Where the entry with the most manually graded modules was found
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RichestEntry {
    pub original_index: Option<usize>,
    pub module_count: u32,
}

/// Move the entry with the largest `manual_graded_total_count` to the front.
///
/// The first entry wins ties. Nothing moves when every count is zero.
pub fn promote_richest_entry(entries: &mut Vec<GradebookEntry>) -> RichestEntry {
    let mut richest = RichestEntry::default();
    for (index, entry) in entries.iter().enumerate() {
        let count = entry.grade_summary.manual_graded_total_count;
        if count > richest.module_count {
            richest = RichestEntry {
                original_index: Some(index),
                module_count: count,
            };
        }
    }

    if let Some(index) = richest.original_index.filter(|i| *i > 0) {
        let entry = entries.remove(index);
        entries.insert(0, entry);
    }
    richest
}

/// Promote, annotate manual grading, then finalize every summary
pub fn assemble_cohort(
    mut entries: Vec<GradebookEntry>,
    ordered_cutoffs: &[(String, f64)],
    processor: &SummaryPostProcessor<'_>,
    annotator: &dyn ManualGradingAnnotator,
) -> Vec<FinalizedGradebookEntry> {
    let richest = promote_richest_entry(&mut entries);
    debug!(
        students = entries.len(),
        seed_index = ?richest.original_index,
        module_count = richest.module_count,
        "Assembling gradebook cohort"
    );

    annotator
        .annotate(entries, richest.original_index, richest.module_count)
        .into_iter()
        .map(|entry| FinalizedGradebookEntry {
            username: entry.username,
            full_name: entry.full_name,
            user_id: entry.user_id,
            email: entry.email,
            course_id: entry.course_id,
            grade_summary: processor.finalize(entry.grade_summary, ordered_cutoffs),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::NoManualGrading;
    use crate::summary::CutoffTable;
    use serde_json::json;
    use std::sync::Mutex;

    fn entry(user_id: i64, manual_count: u32) -> GradebookEntry {
        let summary: RawGradeSummary = serde_json::from_value(json!({
            "percent": 0.5,
            "current_percent": 0.5,
            "manual_graded_total_count": manual_count
        }))
        .unwrap();
        GradebookEntry::new(
            Student {
                user_id,
                username: format!("student{}", user_id),
                email: format!("student{}@example.com", user_id),
                full_name: format!("Student {}", user_id),
            },
            "course-v1:Org+C+1",
            summary,
        )
    }

    fn ids(entries: &[GradebookEntry]) -> Vec<i64> {
        entries.iter().map(|e| e.user_id).collect()
    }

    #[test]
    fn test_richest_moves_to_front() {
        let mut entries = vec![entry(1, 0), entry(2, 2), entry(3, 5), entry(4, 5)];
        let richest = promote_richest_entry(&mut entries);
        assert_eq!(richest, RichestEntry { original_index: Some(2), module_count: 5 });
        assert_eq!(ids(&entries), vec![3, 1, 2, 4]);
    }

    #[test]
    fn test_first_entry_stays_put() {
        let mut entries = vec![entry(1, 4), entry(2, 1)];
        let richest = promote_richest_entry(&mut entries);
        assert_eq!(richest.original_index, Some(0));
        assert_eq!(ids(&entries), vec![1, 2]);
    }

    #[test]
    fn test_no_manual_grading_keeps_order() {
        let mut entries = vec![entry(1, 0), entry(2, 0)];
        assert_eq!(promote_richest_entry(&mut entries), RichestEntry::default());
        assert_eq!(ids(&entries), vec![1, 2]);
        assert_eq!(promote_richest_entry(&mut Vec::new()), RichestEntry::default());
    }

    struct RecordingAnnotator {
        seen: Mutex<Option<(Vec<i64>, Option<usize>, u32)>>,
    }

    impl ManualGradingAnnotator for RecordingAnnotator {
        fn annotate(
            &self,
            entries: Vec<GradebookEntry>,
            seed_index: Option<usize>,
            module_count: u32,
        ) -> Vec<GradebookEntry> {
            *self.seen.lock().unwrap() = Some((ids(&entries), seed_index, module_count));
            entries
        }
    }

    #[test]
    fn test_annotator_sees_reordered_cohort() {
        let annotator = RecordingAnnotator { seen: Mutex::new(None) };
        let processor = SummaryPostProcessor::new(&CutoffTable);
        let cutoffs = vec![("Pass".to_string(), 0.5)];

        let out = assemble_cohort(vec![entry(1, 0), entry(2, 3)], &cutoffs, &processor, &annotator);

        assert_eq!(
            *annotator.seen.lock().unwrap(),
            Some((vec![2, 1], Some(1), 3))
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].user_id, 2);
        assert_eq!(out[0].grade_summary.total_letter_grade.as_deref(), Some("Pass"));
    }

    #[test]
    fn test_passthrough_annotator() {
        let processor = SummaryPostProcessor::new(&CutoffTable);
        let out = assemble_cohort(vec![entry(7, 0)], &[], &processor, &NoManualGrading);
        assert_eq!(out[0].username, "student7");
        assert_eq!(out[0].grade_summary.total_letter_grade, None);
    }
}
