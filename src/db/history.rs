//! Grade history ledger
//!
//! Append-only snapshots of grade record states. A snapshot is only written
//! when at least one material field differs from the latest snapshot for the
//! same (user, course), so repeated identical recomputes leave no trace while
//! every distinct transition is kept.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::debug;

use super::grade_records::GradeRecord;
use super::models::{format_timestamp, timestamp_column};
use crate::error::GradebookError;

/// History entry row from database
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub user_id: i64,
    pub course_id: String,
    pub grade: f64,
    pub proforma_grade: f64,
    pub progress_summary: String,
    pub grade_summary: String,
    pub grading_policy: String,
    pub created: DateTime<Utc>,
}

impl HistoryEntry {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            course_id: row.get("course_id")?,
            grade: row.get("grade")?,
            proforma_grade: row.get("proforma_grade")?,
            progress_summary: row.get("progress_summary")?,
            grade_summary: row.get("grade_summary")?,
            grading_policy: row.get("grading_policy")?,
            created: timestamp_column(row, "created")?,
        })
    }

    /// Whether this snapshot already captures the record's material state.
    /// Blobs are compared byte for byte.
    pub fn matches(&self, record: &GradeRecord) -> bool {
        self.grade == record.grade
            && self.proforma_grade == record.proforma_grade
            && self.progress_summary == record.progress_summary
            && self.grade_summary == record.grade_summary
            && self.grading_policy == record.grading_policy
    }
}

/// Most recent entry for a user and course
pub fn latest(
    conn: &Connection,
    user_id: i64,
    course_id: &str,
) -> Result<Option<HistoryEntry>, GradebookError> {
    let entry = conn
        .query_row(
            "SELECT * FROM grade_history WHERE user_id = ? AND course_id = ? \
             ORDER BY created DESC, id DESC LIMIT 1",
            params![user_id, course_id],
            |row| HistoryEntry::from_row(row),
        )
        .optional()?;
    Ok(entry)
}

/// Entries for a user and course, newest first
pub fn list(
    conn: &Connection,
    user_id: i64,
    course_id: &str,
    limit: u32,
) -> Result<Vec<HistoryEntry>, GradebookError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM grade_history WHERE user_id = ? AND course_id = ? \
         ORDER BY created DESC, id DESC LIMIT ?",
    )?;

    let entries = stmt
        .query_map(params![user_id, course_id, limit as i64], |row| HistoryEntry::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

/// Number of entries for a user and course
pub fn count(conn: &Connection, user_id: i64, course_id: &str) -> Result<u64, GradebookError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM grade_history WHERE user_id = ? AND course_id = ?",
        params![user_id, course_id],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}

/// Snapshot a just-written grade record using the current time
pub fn record(conn: &Connection, record: &GradeRecord) -> Result<bool, GradebookError> {
    record_at(conn, record, Utc::now())
}

/// Snapshot a just-written grade record if its state differs from the latest
/// entry. Returns whether an entry was appended.
///
/// Callers run this inside the transaction that wrote `record`.
pub fn record_at(
    conn: &Connection,
    record: &GradeRecord,
    now: DateTime<Utc>,
) -> Result<bool, GradebookError> {
    if let Some(previous) = latest(conn, record.user_id, &record.course_id)? {
        if previous.matches(record) {
            debug!(
                user_id = record.user_id,
                course_id = %record.course_id,
                "Grade state unchanged since last snapshot"
            );
            return Ok(false);
        }
    }

    conn.execute(
        r#"
        INSERT INTO grade_history (
            user_id, course_id, grade, proforma_grade,
            progress_summary, grade_summary, grading_policy, created
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            record.user_id,
            record.course_id,
            record.grade,
            record.proforma_grade,
            record.progress_summary,
            record.grade_summary,
            record.grading_policy,
            format_timestamp(&now),
        ],
    )?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::grade_records::{upsert_at, GradeRecordInput};
    use crate::db::GradebookDb;
    use chrono::{Duration, TimeZone};

    const COURSE: &str = "course-v1:Org+HIST+2024";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn write(db: &GradebookDb, grade: f64, summary: &str, at: DateTime<Utc>) {
        let input = GradeRecordInput {
            user_id: 9,
            course_id: COURSE.into(),
            grade,
            proforma_grade: 0.9,
            progress_summary: String::new(),
            grade_summary: summary.into(),
            grading_policy: "{}".into(),
        };
        db.with_conn_mut(|conn| upsert_at(conn, &input, at)).unwrap();
    }

    #[test]
    fn test_history_tracks_distinct_states_newest_first() {
        let db = GradebookDb::open_in_memory().unwrap();
        write(&db, 0.2, "a", t0());
        write(&db, 0.4, "b", t0() + Duration::minutes(5));
        write(&db, 0.4, "c", t0() + Duration::minutes(10)); // same grade, store skips
        write(&db, 0.6, "d", t0() + Duration::minutes(15));

        let entries = db.with_conn(|conn| list(conn, 9, COURSE, 10)).unwrap();
        let grades: Vec<f64> = entries.iter().map(|e| e.grade).collect();
        assert_eq!(grades, vec![0.6, 0.4, 0.2]);

        let newest = db.with_conn(|conn| latest(conn, 9, COURSE)).unwrap().unwrap();
        assert_eq!(newest.grade_summary, "d");
        assert_eq!(newest.created, t0() + Duration::minutes(15));
    }

    #[test]
    fn test_record_skips_identical_snapshot() {
        let db = GradebookDb::open_in_memory().unwrap();
        write(&db, 0.2, "a", t0());

        let appended = db
            .with_conn(|conn| {
                let current = crate::db::grade_records::get(conn, 9, COURSE)?;
                record(conn, &current)
            })
            .unwrap();
        assert!(!appended);
        assert_eq!(db.with_conn(|conn| count(conn, 9, COURSE)).unwrap(), 1);
    }

    #[test]
    fn test_blob_difference_is_a_change() {
        let db = GradebookDb::open_in_memory().unwrap();
        write(&db, 0.2, "{\"a\":1}", t0());

        let appended = db
            .with_conn(|conn| {
                let mut current = crate::db::grade_records::get(conn, 9, COURSE)?;
                // same JSON, different whitespace
                current.grade_summary = "{\"a\": 1}".into();
                record_at(conn, &current, t0() + Duration::minutes(1))
            })
            .unwrap();
        assert!(appended);
        assert_eq!(db.with_conn(|conn| count(conn, 9, COURSE)).unwrap(), 2);
    }

    #[test]
    fn test_latest_none_for_unknown_key() {
        let db = GradebookDb::open_in_memory().unwrap();
        assert!(db.with_conn(|conn| latest(conn, 1, COURSE)).unwrap().is_none());
    }
}
