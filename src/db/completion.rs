//! Course completion classification
//!
//! A user has completed a course when their proforma grade (the best grade
//! still achievable) is non-zero and no longer exceeds their actual grade by
//! more than the configured tolerance.

use chrono::{DateTime, Utc};
use rusqlite::{params_from_iter, types::Value, Connection};

use super::grade_records::GradeRecord;
use super::models::{format_timestamp, timestamp_column, ScopeFilter};
use crate::error::GradebookError;
use crate::providers::ActivityEvent;

/// Default tolerance between proforma grade and grade
pub const DEFAULT_COMPLETE_MATCH_RANGE: f64 = 0.01;

/// Whether the given grade pair counts as completed
pub fn is_complete(grade: f64, proforma_grade: f64, epsilon: f64) -> bool {
    proforma_grade > 0.0 && proforma_grade <= grade + epsilon
}

/// Whether a cached grade record counts as completed
pub fn is_completed(record: &GradeRecord, epsilon: f64) -> bool {
    is_complete(record.grade, record.proforma_grade, epsilon)
}

fn completed_clause(
    course_id: &str,
    scope: &ScopeFilter,
    epsilon: f64,
    values: &mut Vec<Value>,
) -> String {
    values.push(Value::Text(course_id.to_string()));
    values.push(Value::Real(epsilon));
    let clause = scope.eligible_clause("r.user_id", course_id, values);
    format!(
        "r.course_id = ? AND r.proforma_grade > 0 AND r.proforma_grade <= r.grade + ? AND {}",
        clause
    )
}

/// Number of distinct eligible users who completed the course
pub fn count_completed(
    conn: &Connection,
    course_id: &str,
    scope: &ScopeFilter,
    epsilon: f64,
) -> Result<u64, GradebookError> {
    let mut values = vec![];
    let clause = completed_clause(course_id, scope, epsilon, &mut values);
    let sql = format!("SELECT COUNT(DISTINCT r.user_id) FROM grade_records r WHERE {}", clause);

    let n: i64 = conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
    Ok(n as u64)
}

/// Eligible users who completed the course, ascending by id
pub fn completed_users(
    conn: &Connection,
    course_id: &str,
    scope: &ScopeFilter,
    epsilon: f64,
) -> Result<Vec<i64>, GradebookError> {
    let mut values = vec![];
    let clause = completed_clause(course_id, scope, epsilon, &mut values);
    let sql = format!(
        "SELECT DISTINCT r.user_id FROM grade_records r WHERE {} ORDER BY r.user_id",
        clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let users = stmt
        .query_map(params_from_iter(values.iter()), |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

/// Completion events (record `modified` time) in `[from, until)`
pub fn completion_events(
    conn: &Connection,
    course_id: &str,
    scope: &ScopeFilter,
    epsilon: f64,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<ActivityEvent>, GradebookError> {
    let mut values = vec![];
    let clause = completed_clause(course_id, scope, epsilon, &mut values);
    values.push(Value::Text(format_timestamp(&from)));
    values.push(Value::Text(format_timestamp(&until)));
    let sql = format!(
        "SELECT r.user_id AS user_id, r.modified AS modified FROM grade_records r \
         WHERE {} AND r.modified >= ? AND r.modified < ? ORDER BY r.modified",
        clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let events = stmt
        .query_map(params_from_iter(values.iter()), |row| {
            Ok(ActivityEvent {
                user_id: row.get("user_id")?,
                at: timestamp_column(row, "modified")?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}
