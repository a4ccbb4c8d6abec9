//! Progress mirror: course starts, module completions and interactions

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value, Connection};

use super::models::{format_timestamp, timestamp_column, ScopeFilter};
use super::GradebookDb;
use crate::error::GradebookError;
use crate::providers::{ActivityEvent, ProgressProvider};

/// Record the first time a user did anything in a course. Later calls keep
/// the earliest timestamp.
pub fn record_start(
    conn: &Connection,
    user_id: i64,
    course_id: &str,
    started_at: DateTime<Utc>,
) -> Result<(), GradebookError> {
    conn.execute(
        r#"
        INSERT INTO course_starts (user_id, course_id, started_at) VALUES (?, ?, ?)
        ON CONFLICT(user_id, course_id) DO UPDATE SET
            started_at = MIN(started_at, excluded.started_at)
        "#,
        params![user_id, course_id, format_timestamp(&started_at)],
    )?;
    Ok(())
}

pub fn record_module_completion(
    conn: &Connection,
    user_id: i64,
    course_id: &str,
    module_id: &str,
    completed_at: DateTime<Utc>,
) -> Result<(), GradebookError> {
    conn.execute(
        "INSERT INTO module_completions (user_id, course_id, module_id, completed_at) VALUES (?, ?, ?, ?)",
        params![user_id, course_id, module_id, format_timestamp(&completed_at)],
    )?;
    Ok(())
}

pub fn record_module_interaction(
    conn: &Connection,
    user_id: i64,
    course_id: &str,
    module_id: &str,
    interacted_at: DateTime<Utc>,
) -> Result<(), GradebookError> {
    conn.execute(
        "INSERT INTO module_interactions (user_id, course_id, module_id, interacted_at) VALUES (?, ?, ?, ?)",
        params![user_id, course_id, module_id, format_timestamp(&interacted_at)],
    )?;
    Ok(())
}

/// Events from `table` for eligible users with `time_col` in `[from, until)`.
/// A missing `from` means "since the beginning".
fn scoped_events(
    conn: &Connection,
    table: &str,
    time_col: &str,
    course_id: &str,
    scope: &ScopeFilter,
    from: Option<DateTime<Utc>>,
    until: DateTime<Utc>,
) -> Result<Vec<ActivityEvent>, GradebookError> {
    let mut values = vec![
        Value::Text(course_id.to_string()),
        Value::Text(format_timestamp(&until)),
    ];
    let mut lower = String::new();
    if let Some(from) = from {
        lower = format!(" AND r.{} >= ?", time_col);
        values.push(Value::Text(format_timestamp(&from)));
    }
    let clause = scope.eligible_clause("r.user_id", course_id, &mut values);
    let sql = format!(
        "SELECT r.user_id AS user_id, r.{col} AS {col} FROM {table} r \
         WHERE r.course_id = ? AND r.{col} < ?{lower} AND {clause} ORDER BY r.{col}",
        col = time_col,
        table = table,
        lower = lower,
        clause = clause,
    );

    let mut stmt = conn.prepare(&sql)?;
    let events = stmt
        .query_map(params_from_iter(values.iter()), |row| {
            Ok(ActivityEvent {
                user_id: row.get(0)?,
                at: timestamp_column(row, time_col)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}

impl ProgressProvider for GradebookDb {
    fn start_events(
        &self,
        course_id: &str,
        scope: &ScopeFilter,
        until: DateTime<Utc>,
    ) -> Result<Vec<ActivityEvent>, GradebookError> {
        self.with_conn(|conn| {
            scoped_events(conn, "course_starts", "started_at", course_id, scope, None, until)
        })
    }

    fn module_completion_events(
        &self,
        course_id: &str,
        scope: &ScopeFilter,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<ActivityEvent>, GradebookError> {
        self.with_conn(|conn| {
            scoped_events(conn, "module_completions", "completed_at", course_id, scope, Some(from), until)
        })
    }

    fn module_interaction_events(
        &self,
        course_id: &str,
        scope: &ScopeFilter,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<ActivityEvent>, GradebookError> {
        self.with_conn(|conn| {
            scoped_events(conn, "module_interactions", "interacted_at", course_id, scope, Some(from), until)
        })
    }
}
