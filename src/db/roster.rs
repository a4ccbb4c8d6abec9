//! Roster mirror: users, enrollments and memberships
//!
//! Populated from the external enrollment store. The analytics only read
//! these tables; the write helpers exist for the sync job and for tests.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value, Connection};
use serde::Deserialize;

use super::models::{format_timestamp, timestamp_column, ScopeFilter};
use super::GradebookDb;
use crate::error::GradebookError;
use crate::providers::{ActivityEvent, EnrollmentProvider, Student};

/// Input for mirroring a user
#[derive(Debug, Clone, Deserialize)]
pub struct UserInput {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl UserInput {
    pub fn new(id: i64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            email: String::new(),
            full_name: String::new(),
            is_active: true,
        }
    }
}

// ============================================================================
// Write Operations
// ============================================================================

/// Insert or refresh a user
pub fn upsert_user(conn: &Connection, input: &UserInput) -> Result<(), GradebookError> {
    conn.execute(
        r#"
        INSERT INTO users (id, username, email, full_name, is_active)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            username = excluded.username,
            email = excluded.email,
            full_name = excluded.full_name,
            is_active = excluded.is_active
        "#,
        params![
            input.id,
            input.username,
            input.email,
            input.full_name,
            input.is_active as i32,
        ],
    )?;
    Ok(())
}

/// Record an active enrollment created at `created`
pub fn enroll(
    conn: &Connection,
    user_id: i64,
    course_id: &str,
    created: DateTime<Utc>,
) -> Result<(), GradebookError> {
    conn.execute(
        r#"
        INSERT INTO enrollments (user_id, course_id, is_active, is_staff, created)
        VALUES (?, ?, 1, 0, ?)
        ON CONFLICT(user_id, course_id) DO UPDATE SET is_active = 1
        "#,
        params![user_id, course_id, format_timestamp(&created)],
    )?;
    Ok(())
}

/// Activate or deactivate an existing enrollment
pub fn set_enrollment_active(
    conn: &Connection,
    user_id: i64,
    course_id: &str,
    active: bool,
) -> Result<bool, GradebookError> {
    let changed = conn.execute(
        "UPDATE enrollments SET is_active = ? WHERE user_id = ? AND course_id = ?",
        params![active as i32, user_id, course_id],
    )?;
    Ok(changed > 0)
}

/// Flag an enrollment as held by course staff
pub fn set_staff(
    conn: &Connection,
    user_id: i64,
    course_id: &str,
    is_staff: bool,
) -> Result<bool, GradebookError> {
    let changed = conn.execute(
        "UPDATE enrollments SET is_staff = ? WHERE user_id = ? AND course_id = ?",
        params![is_staff as i32, user_id, course_id],
    )?;
    Ok(changed > 0)
}

pub fn add_to_group(conn: &Connection, user_id: i64, group_id: i64) -> Result<(), GradebookError> {
    conn.execute(
        "INSERT OR IGNORE INTO user_groups (user_id, group_id) VALUES (?, ?)",
        params![user_id, group_id],
    )?;
    Ok(())
}

pub fn add_to_organization(conn: &Connection, user_id: i64, org_id: i64) -> Result<(), GradebookError> {
    conn.execute(
        "INSERT OR IGNORE INTO user_organizations (user_id, org_id) VALUES (?, ?)",
        params![user_id, org_id],
    )?;
    Ok(())
}

// ============================================================================
// Read Operations
// ============================================================================

/// Users with an active enrollment in the course, minus `excluding`.
///
/// Only the enrollment flag counts here; a deactivated account that is
/// still enrolled stays in the set.
pub fn active_users_in(
    conn: &Connection,
    course_id: &str,
    excluding: &[i64],
) -> Result<BTreeSet<i64>, GradebookError> {
    let mut values = vec![Value::Text(course_id.to_string())];
    let clause = ScopeFilter::new()
        .excluding(excluding.iter().copied())
        .membership_clause("e.user_id", &mut values);
    let sql = format!(
        "SELECT DISTINCT e.user_id FROM enrollments e WHERE e.course_id = ? AND e.is_active = 1{}",
        clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let users = stmt
        .query_map(params_from_iter(values.iter()), |row| row.get::<_, i64>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(users)
}

/// Enrollment timestamps of eligible users created before `until`
pub fn enrollment_events(
    conn: &Connection,
    course_id: &str,
    scope: &ScopeFilter,
    until: DateTime<Utc>,
) -> Result<Vec<ActivityEvent>, GradebookError> {
    let mut values = vec![
        Value::Text(course_id.to_string()),
        Value::Text(format_timestamp(&until)),
    ];
    let clause = scope.eligible_clause("r.user_id", course_id, &mut values);
    let sql = format!(
        "SELECT r.user_id AS user_id, r.created AS created FROM enrollments r \
         WHERE r.course_id = ? AND r.created < ? AND {} ORDER BY r.created",
        clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let events = stmt
        .query_map(params_from_iter(values.iter()), |row| {
            Ok(ActivityEvent {
                user_id: row.get("user_id")?,
                at: timestamp_column(row, "created")?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}

/// Active, non-staff students of a course ordered by username
pub fn non_staff_students(conn: &Connection, course_id: &str) -> Result<Vec<Student>, GradebookError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT u.id, u.username, u.email, u.full_name
        FROM users u
        JOIN enrollments e ON e.user_id = u.id
        WHERE e.course_id = ? AND e.is_active = 1 AND e.is_staff = 0
        ORDER BY u.username
        "#,
    )?;

    let students = stmt
        .query_map(params![course_id], |row| {
            Ok(Student {
                user_id: row.get("id")?,
                username: row.get("username")?,
                email: row.get("email")?,
                full_name: row.get("full_name")?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(students)
}

/// Grade records in the course whose user the roster no longer recognizes
/// as an active, actively enrolled user
pub fn orphaned_record_users(conn: &Connection, course_id: &str) -> Result<Vec<i64>, GradebookError> {
    let mut values = vec![Value::Text(course_id.to_string())];
    let clause = ScopeFilter::new().eligible_clause("r.user_id", course_id, &mut values);
    let sql = format!(
        "SELECT r.user_id FROM grade_records r WHERE r.course_id = ? AND NOT ({}) ORDER BY r.user_id",
        clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let users = stmt
        .query_map(params_from_iter(values.iter()), |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

impl EnrollmentProvider for GradebookDb {
    fn active_users_in(
        &self,
        course_id: &str,
        excluding: &[i64],
    ) -> Result<BTreeSet<i64>, GradebookError> {
        self.with_conn(|conn| active_users_in(conn, course_id, excluding))
    }

    fn enrollment_events(
        &self,
        course_id: &str,
        scope: &ScopeFilter,
        until: DateTime<Utc>,
    ) -> Result<Vec<ActivityEvent>, GradebookError> {
        self.with_conn(|conn| enrollment_events(conn, course_id, scope, until))
    }

    fn non_staff_students(&self, course_id: &str) -> Result<Vec<Student>, GradebookError> {
        self.with_conn(|conn| non_staff_students(conn, course_id))
    }
}
