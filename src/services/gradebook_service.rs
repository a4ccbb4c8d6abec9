//! Gradebook service - grade cache writes and course analytics
//!
//! Wraps the repository functions with configuration defaults, event
//! emission and the calls out to the grading engine.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::analytics::{SeriesQuery, TimeSeriesAggregator, TimeSeriesMetrics};
use crate::config::Config;
use crate::db::grade_records::{self, GradeRecord, GradeRecordInput, UpsertOutcome, UpsertResult};
use crate::db::leaderboard::{self, Leaderboard, LeaderboardQuery, UserPosition};
use crate::db::{completion, history, GradebookDb, HistoryEntry, ScopeFilter};
use crate::error::GradebookError;
use crate::providers::{
    ComputedGrade, EnrollmentProvider, GradingEngine, LetterGradeLookup, ManualGradingAnnotator,
};
use crate::summary::{
    assemble_cohort, ordered_cutoffs, FinalizedGradebookEntry, GradebookEntry, RawGradeSummary,
    SummaryPostProcessor,
};

use super::events::{EventBus, GradebookEvent};

/// Serialized form of an engine blob; `{}` when there is nothing to store
fn blob_json(value: &serde_json::Value) -> String {
    if value.is_null() {
        return "{}".to_string();
    }
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

pub struct GradebookService {
    db: Arc<GradebookDb>,
    events: Arc<EventBus>,
    config: Config,
}

impl GradebookService {
    pub fn new(db: Arc<GradebookDb>, events: Arc<EventBus>, config: Config) -> Self {
        Self { db, events, config }
    }

    pub fn db(&self) -> &GradebookDb {
        &self.db
    }

    // =========================================================================
    // Grade cache
    // =========================================================================

    /// Store a computed grade and publish what happened
    pub fn record_grade(&self, input: &GradeRecordInput) -> Result<UpsertResult, GradebookError> {
        let result = self
            .db
            .with_conn_mut(|conn| grade_records::upsert(conn, input))?;

        if result.outcome != UpsertOutcome::Unchanged {
            self.events.emit(GradebookEvent::GradeRecorded {
                user_id: result.record.user_id,
                course_id: result.record.course_id.clone(),
                grade: result.record.grade,
                outcome: result.outcome,
            });
        }
        if result.history_appended {
            self.events.emit(GradebookEvent::HistoryAppended {
                user_id: result.record.user_id,
                course_id: result.record.course_id.clone(),
                grade: result.record.grade,
                proforma_grade: result.record.proforma_grade,
            });
        }

        Ok(result)
    }

    /// Recompute a user's grade with the engine and cache it
    pub fn refresh_user_grade(
        &self,
        engine: &dyn GradingEngine,
        user_id: i64,
        course_id: &str,
    ) -> Result<UpsertResult, GradebookError> {
        let computed = engine.compute_grade(user_id, course_id)?;
        let result = self.record_computed(user_id, course_id, &computed)?;
        debug!(user_id, course_id, outcome = ?result.outcome, "Grade refreshed");
        Ok(result)
    }

    /// Cache a grade the engine already computed
    pub fn record_computed(
        &self,
        user_id: i64,
        course_id: &str,
        computed: &ComputedGrade,
    ) -> Result<UpsertResult, GradebookError> {
        let input = GradeRecordInput {
            user_id,
            course_id: course_id.to_string(),
            grade: computed.grade,
            proforma_grade: computed.proforma_grade,
            progress_summary: blob_json(&computed.progress_summary),
            grade_summary: blob_json(&computed.grade_summary),
            grading_policy: blob_json(&computed.grading_policy),
        };
        self.record_grade(&input)
    }

    pub fn get_record(&self, user_id: i64, course_id: &str) -> Result<GradeRecord, GradebookError> {
        self.db
            .with_conn(|conn| grade_records::get(conn, user_id, course_id))
    }

    /// Grade history, newest first
    pub fn history(
        &self,
        user_id: i64,
        course_id: &str,
        limit: u32,
    ) -> Result<Vec<HistoryEntry>, GradebookError> {
        self.db
            .with_conn(|conn| history::list(conn, user_id, course_id, limit))
    }

    // =========================================================================
    // Analytics
    // =========================================================================

    /// Leaderboard query preset with the configured row count
    pub fn leaderboard_query(&self, course_id: &str) -> LeaderboardQuery {
        LeaderboardQuery::new(course_id).top(self.config.leaderboard_count)
    }

    pub fn leaderboard(&self, query: &LeaderboardQuery) -> Result<Leaderboard, GradebookError> {
        self.db
            .with_conn(|conn| leaderboard::generate_leaderboard(conn, query))
    }

    pub fn user_position(
        &self,
        course_id: &str,
        user_id: i64,
        scope: &ScopeFilter,
    ) -> Result<UserPosition, GradebookError> {
        self.db
            .with_conn(|conn| leaderboard::get_user_position(conn, course_id, user_id, scope))
    }

    /// Users who completed the course under the configured tolerance
    pub fn count_completed(&self, course_id: &str, scope: &ScopeFilter) -> Result<u64, GradebookError> {
        let epsilon = self.config.complete_match_range;
        self.db
            .with_conn(|conn| completion::count_completed(conn, course_id, scope, epsilon))
    }

    pub fn time_series(&self, query: &SeriesQuery) -> Result<TimeSeriesMetrics, GradebookError> {
        TimeSeriesAggregator::new(&self.db, self.config.complete_match_range).build_series(query)
    }

    // =========================================================================
    // Gradebook view
    // =========================================================================

    /// Finalized gradebook rows for every non-staff student in a course
    pub fn build_cohort(
        &self,
        course_id: &str,
        engine: &dyn GradingEngine,
        lookup: &dyn LetterGradeLookup,
        grade_cutoffs: &HashMap<String, f64>,
        annotator: &dyn ManualGradingAnnotator,
    ) -> Result<Vec<FinalizedGradebookEntry>, GradebookError> {
        let students = self.db.non_staff_students(course_id)?;

        let mut entries = Vec::with_capacity(students.len());
        for student in students {
            let computed = engine.compute_grade(student.user_id, course_id)?;
            let summary: RawGradeSummary = serde_json::from_value(computed.grade_summary)?;
            entries.push(GradebookEntry::new(student, course_id, summary));
        }

        let cutoffs = ordered_cutoffs(grade_cutoffs);
        let processor = SummaryPostProcessor::new(lookup);
        let cohort = assemble_cohort(entries, &cutoffs, &processor, annotator);

        info!(course_id, students = cohort.len(), "Gradebook cohort built");
        Ok(cohort)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::roster::{enroll, set_staff, upsert_user, UserInput};
    use crate::providers::NoManualGrading;
    use crate::summary::CutoffTable;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    const COURSE: &str = "course-v1:Org+SVC+2024";

    struct FixedEngine;

    impl GradingEngine for FixedEngine {
        fn compute_grade(&self, user_id: i64, _course_id: &str) -> Result<ComputedGrade, GradebookError> {
            let grade = user_id as f64 / 10.0;
            Ok(ComputedGrade {
                grade,
                proforma_grade: grade,
                progress_summary: serde_json::Value::Null,
                grade_summary: json!({
                    "percent": grade,
                    "current_percent": grade,
                    "section_breakdown": [],
                    "manual_graded_total_count": user_id as u32 % 3
                }),
                grading_policy: json!({"GRADER": []}),
            })
        }
    }

    fn service() -> (GradebookService, Arc<EventBus>) {
        let db = Arc::new(GradebookDb::open_in_memory().unwrap());
        let events = Arc::new(EventBus::new());
        (GradebookService::new(db, events.clone(), Config::default()), events)
    }

    #[tokio::test]
    async fn test_refresh_emits_events_once() {
        let (svc, events) = service();
        let mut rx = events.subscribe();

        let first = svc.refresh_user_grade(&FixedEngine, 5, COURSE).unwrap();
        assert_eq!(first.outcome, UpsertOutcome::Created);
        assert_eq!(first.record.progress_summary, "{}");

        let again = svc.refresh_user_grade(&FixedEngine, 5, COURSE).unwrap();
        assert_eq!(again.outcome, UpsertOutcome::Unchanged);

        assert!(matches!(
            rx.recv().await.unwrap(),
            GradebookEvent::GradeRecorded { outcome: UpsertOutcome::Created, .. }
        ));
        assert!(matches!(rx.recv().await.unwrap(), GradebookEvent::HistoryAppended { .. }));
        assert!(rx.try_recv().is_err());

        assert_eq!(svc.history(5, COURSE, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_leaderboard_uses_configured_count() {
        let (svc, _) = service();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        svc.db()
            .with_conn(|conn| {
                for id in 1..=5 {
                    upsert_user(conn, &UserInput::new(id, format!("u{}", id)))?;
                    enroll(conn, id, COURSE, at)?;
                }
                Ok(())
            })
            .unwrap();
        for id in 1..=5 {
            svc.refresh_user_grade(&FixedEngine, id, COURSE).unwrap();
        }

        let board = svc.leaderboard(&svc.leaderboard_query(COURSE).for_user(2)).unwrap();
        assert_eq!(board.rows.len(), 3);
        assert_eq!(board.rows[0].user_id, 5);
        assert_eq!(board.user_position, Some(4));
        assert_eq!(svc.count_completed(COURSE, &ScopeFilter::new()).unwrap(), 5);
    }

    #[test]
    fn test_build_cohort_skips_staff() {
        let (svc, _) = service();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        svc.db()
            .with_conn(|conn| {
                for (id, name) in [(1, "carol"), (2, "alice"), (4, "bob")] {
                    upsert_user(conn, &UserInput::new(id, name))?;
                    enroll(conn, id, COURSE, at)?;
                }
                set_staff(conn, 4, COURSE, true)?;
                Ok(())
            })
            .unwrap();

        let cutoffs: HashMap<String, f64> = [("Pass".to_string(), 0.15)].into();
        let cohort = svc
            .build_cohort(COURSE, &FixedEngine, &CutoffTable, &cutoffs, &NoManualGrading)
            .unwrap();

        let names: Vec<&str> = cohort.iter().map(|e| e.username.as_str()).collect();
        assert_eq!(names, vec!["alice", "carol"]);
        assert_eq!(cohort[0].grade_summary.total_letter_grade.as_deref(), Some("Pass"));
        assert_eq!(cohort[1].grade_summary.total_letter_grade, None);
    }
}
