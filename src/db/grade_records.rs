//! Grade record cache
//!
//! One row per (user, course) holding the last grade the grading engine
//! produced. Writes go through [`upsert`], which also feeds the history
//! ledger inside the same transaction.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::history;
use super::models::{format_timestamp, timestamp_column};
use crate::error::GradebookError;

/// Grade record row from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeRecord {
    pub user_id: i64,
    pub course_id: String,
    pub grade: f64,
    pub proforma_grade: f64,
    pub progress_summary: String,
    pub grade_summary: String,
    pub grading_policy: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl GradeRecord {
    pub(crate) fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            user_id: row.get("user_id")?,
            course_id: row.get("course_id")?,
            grade: row.get("grade")?,
            proforma_grade: row.get("proforma_grade")?,
            progress_summary: row.get("progress_summary")?,
            grade_summary: row.get("grade_summary")?,
            grading_policy: row.get("grading_policy")?,
            created: timestamp_column(row, "created")?,
            modified: timestamp_column(row, "modified")?,
        })
    }
}

/// Input for writing a freshly computed grade
#[derive(Debug, Clone, Deserialize)]
pub struct GradeRecordInput {
    pub user_id: i64,
    pub course_id: String,
    pub grade: f64,
    pub proforma_grade: f64,
    #[serde(default)]
    pub progress_summary: String,
    pub grade_summary: String,
    pub grading_policy: String,
}

impl GradeRecordInput {
    fn validate(&self) -> Result<(), GradebookError> {
        if self.course_id.is_empty() {
            return Err(GradebookError::Validation("course_id is required".into()));
        }
        if !self.grade.is_finite() || !self.proforma_grade.is_finite() {
            return Err(GradebookError::Validation(format!(
                "grade values must be finite (grade={}, proforma_grade={})",
                self.grade, self.proforma_grade
            )));
        }
        Ok(())
    }
}

/// What an upsert did to the stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// Incoming grade equals the stored one; nothing was written
    Unchanged,
}

/// Result of [`upsert`]
#[derive(Debug, Clone, Serialize)]
pub struct UpsertResult {
    pub record: GradeRecord,
    pub outcome: UpsertOutcome,
    pub history_appended: bool,
}

// ============================================================================
// Read Operations
// ============================================================================

/// Find the record for a user and course
pub fn find(
    conn: &Connection,
    user_id: i64,
    course_id: &str,
) -> Result<Option<GradeRecord>, GradebookError> {
    let record = conn
        .query_row(
            "SELECT * FROM grade_records WHERE user_id = ? AND course_id = ?",
            params![user_id, course_id],
            |row| GradeRecord::from_row(row),
        )
        .optional()?;
    Ok(record)
}

/// Get the record for a user and course, failing if it was never written
pub fn get(conn: &Connection, user_id: i64, course_id: &str) -> Result<GradeRecord, GradebookError> {
    find(conn, user_id, course_id)?.ok_or_else(|| {
        GradebookError::NotFound(format!(
            "No grade record for user {} in course {}",
            user_id, course_id
        ))
    })
}

/// List all records for a course, best grade first
pub fn list_for_course(conn: &Connection, course_id: &str) -> Result<Vec<GradeRecord>, GradebookError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM grade_records WHERE course_id = ? ORDER BY grade DESC, modified ASC",
    )?;

    let records = stmt
        .query_map(params![course_id], |row| GradeRecord::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
}

// ============================================================================
// Write Operations
// ============================================================================

/// Write a computed grade using the current time
pub fn upsert(conn: &mut Connection, input: &GradeRecordInput) -> Result<UpsertResult, GradebookError> {
    upsert_at(conn, input, Utc::now())
}

/// Write a computed grade as of `now`
///
/// Only `grade` is compared against the stored record: a recompute that
/// yields the same grade leaves the row and its `modified` untouched even if
/// the blobs changed.
pub fn upsert_at(
    conn: &mut Connection,
    input: &GradeRecordInput,
    now: DateTime<Utc>,
) -> Result<UpsertResult, GradebookError> {
    input.validate()?;

    // IMMEDIATE takes the write lock up front so the read-compare-write and
    // the ledger append can't interleave with another writer.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let existing = find(&tx, input.user_id, &input.course_id)?;
    let ts = format_timestamp(&now);

    let outcome = match &existing {
        None => {
            tx.execute(
                r#"
                INSERT INTO grade_records (
                    user_id, course_id, grade, proforma_grade,
                    progress_summary, grade_summary, grading_policy, created, modified
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    input.user_id,
                    input.course_id,
                    input.grade,
                    input.proforma_grade,
                    input.progress_summary,
                    input.grade_summary,
                    input.grading_policy,
                    ts,
                    ts,
                ],
            )?;
            UpsertOutcome::Created
        }
        Some(record) if record.grade != input.grade => {
            tx.execute(
                r#"
                UPDATE grade_records SET
                    grade = ?, proforma_grade = ?, progress_summary = ?,
                    grade_summary = ?, grading_policy = ?, modified = ?
                WHERE user_id = ? AND course_id = ?
                "#,
                params![
                    input.grade,
                    input.proforma_grade,
                    input.progress_summary,
                    input.grade_summary,
                    input.grading_policy,
                    ts,
                    input.user_id,
                    input.course_id,
                ],
            )?;
            UpsertOutcome::Updated
        }
        Some(_) => UpsertOutcome::Unchanged,
    };

    let (record, history_appended) = match (outcome, existing) {
        (UpsertOutcome::Unchanged, Some(record)) => (record, false),
        _ => {
            let record = get(&tx, input.user_id, &input.course_id)?;
            let appended = history::record_at(&tx, &record, now)?;
            (record, appended)
        }
    };

    tx.commit()?;

    debug!(
        user_id = input.user_id,
        course_id = %input.course_id,
        outcome = ?outcome,
        history_appended,
        "Grade record upserted"
    );

    Ok(UpsertResult {
        record,
        outcome,
        history_appended,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::GradebookDb;
    use chrono::{Duration, TimeZone};

    fn input(user_id: i64, grade: f64) -> GradeRecordInput {
        GradeRecordInput {
            user_id,
            course_id: "course-v1:Org+CS101+2024".into(),
            grade,
            proforma_grade: grade,
            progress_summary: "{}".into(),
            grade_summary: format!("{{\"percent\": {}}}", grade),
            grading_policy: "{\"GRADER\": []}".into(),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_first_upsert_creates_record() {
        let db = GradebookDb::open_in_memory().unwrap();
        let result = db
            .with_conn_mut(|conn| upsert_at(conn, &input(1, 0.5), t0()))
            .unwrap();

        assert_eq!(result.outcome, UpsertOutcome::Created);
        assert!(result.history_appended);
        assert_eq!(result.record.created, t0());
        assert_eq!(result.record.modified, t0());
        assert_eq!(result.record.grade, 0.5);
    }

    #[test]
    fn test_same_grade_is_noop() {
        let db = GradebookDb::open_in_memory().unwrap();
        db.with_conn_mut(|conn| upsert_at(conn, &input(1, 0.5), t0())).unwrap();

        let mut again = input(1, 0.5);
        again.grade_summary = "{\"percent\": 0.5, \"changed\": true}".into();
        let result = db
            .with_conn_mut(|conn| upsert_at(conn, &again, t0() + Duration::hours(1)))
            .unwrap();

        assert_eq!(result.outcome, UpsertOutcome::Unchanged);
        assert!(!result.history_appended);
        assert_eq!(result.record.modified, t0());
        // blobs are not rewritten when the grade matches
        assert_eq!(result.record.grade_summary, "{\"percent\": 0.5}");

        let entries = db.with_conn(|conn| history::count(conn, 1, &again.course_id)).unwrap();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_changed_grade_overwrites_and_advances_modified() {
        let db = GradebookDb::open_in_memory().unwrap();
        db.with_conn_mut(|conn| upsert_at(conn, &input(1, 0.5), t0())).unwrap();

        let later = t0() + Duration::hours(2);
        let result = db
            .with_conn_mut(|conn| upsert_at(conn, &input(1, 0.75), later))
            .unwrap();

        assert_eq!(result.outcome, UpsertOutcome::Updated);
        assert!(result.history_appended);
        assert_eq!(result.record.grade, 0.75);
        assert_eq!(result.record.created, t0());
        assert_eq!(result.record.modified, later);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let db = GradebookDb::open_in_memory().unwrap();
        let err = db.with_conn(|conn| get(conn, 42, "nope")).unwrap_err();
        assert!(matches!(err, GradebookError::NotFound(_)));
    }

    #[test]
    fn test_non_finite_grade_rejected() {
        let db = GradebookDb::open_in_memory().unwrap();
        let err = db
            .with_conn_mut(|conn| upsert(conn, &input(1, f64::NAN)))
            .unwrap_err();
        assert!(matches!(err, GradebookError::Validation(_)));
    }

    #[test]
    fn test_list_for_course_orders_by_rank() {
        let db = GradebookDb::open_in_memory().unwrap();
        db.with_conn_mut(|conn| {
            upsert_at(conn, &input(1, 0.4), t0())?;
            upsert_at(conn, &input(2, 0.9), t0())?;
            upsert_at(conn, &input(3, 0.9), t0() - Duration::minutes(1))?;
            Ok(())
        })
        .unwrap();

        let records = db
            .with_conn(|conn| list_for_course(conn, "course-v1:Org+CS101+2024"))
            .unwrap();
        let users: Vec<i64> = records.iter().map(|r| r.user_id).collect();
        assert_eq!(users, vec![3, 2, 1]);
    }
}
