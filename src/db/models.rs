//! Shared model helpers: timestamps and population scoping

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use crate::error::GradebookError;

// ============================================================================
// Timestamps
// ============================================================================

/// Fixed-width UTC format; lexical order matches chronological order
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Format a timestamp for storage
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, GradebookError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| GradebookError::Internal(format!("Bad timestamp '{}': {}", value, e)))
}

/// Read a timestamp column, surfacing parse failures as conversion errors
pub(crate) fn timestamp_column(
    row: &rusqlite::Row,
    column: &str,
) -> Result<DateTime<Utc>, rusqlite::Error> {
    let raw: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

// ============================================================================
// Population scoping
// ============================================================================

/// Which users of a course an aggregate should consider
///
/// Excluded users are always removed. Group and organization lists are
/// membership filters: a user qualifies when they belong to at least one of
/// the listed ids. Empty lists mean "no filter".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeFilter {
    #[serde(default)]
    pub excluded_users: Vec<i64>,
    #[serde(default)]
    pub group_ids: Vec<i64>,
    #[serde(default)]
    pub org_ids: Vec<i64>,
}

impl ScopeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn excluding(mut self, users: impl IntoIterator<Item = i64>) -> Self {
        self.excluded_users.extend(users);
        self
    }

    pub fn in_groups(mut self, groups: impl IntoIterator<Item = i64>) -> Self {
        self.group_ids.extend(groups);
        self
    }

    pub fn in_orgs(mut self, orgs: impl IntoIterator<Item = i64>) -> Self {
        self.org_ids.extend(orgs);
        self
    }

    pub fn is_excluded(&self, user_id: i64) -> bool {
        self.excluded_users.contains(&user_id)
    }

    /// Conditions restricting `user_col` to the eligible population of a course:
    /// active user, active enrollment, not excluded, in the group/org filters.
    ///
    /// Membership is tested with `EXISTS` so users in several listed groups are
    /// counted once.
    pub(crate) fn eligible_clause(
        &self,
        user_col: &str,
        course_id: &str,
        params: &mut Vec<Value>,
    ) -> String {
        let mut clause = format!(
            "EXISTS (SELECT 1 FROM users u JOIN enrollments e ON e.user_id = u.id \
             WHERE u.id = {col} AND u.is_active = 1 AND e.is_active = 1 AND e.course_id = ?)",
            col = user_col
        );
        params.push(Value::Text(course_id.to_string()));
        clause.push_str(&self.membership_clause(user_col, params));
        clause
    }

    /// Exclusion and membership conditions only, each prefixed with ` AND `
    pub(crate) fn membership_clause(&self, user_col: &str, params: &mut Vec<Value>) -> String {
        let mut clause = String::new();

        if !self.excluded_users.is_empty() {
            clause.push_str(&format!(
                " AND {} NOT IN ({})",
                user_col,
                placeholders(self.excluded_users.len())
            ));
            params.extend(self.excluded_users.iter().map(|id| Value::Integer(*id)));
        }

        if !self.group_ids.is_empty() {
            clause.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM user_groups g WHERE g.user_id = {} AND g.group_id IN ({}))",
                user_col,
                placeholders(self.group_ids.len())
            ));
            params.extend(self.group_ids.iter().map(|id| Value::Integer(*id)));
        }

        if !self.org_ids.is_empty() {
            clause.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM user_organizations o WHERE o.user_id = {} AND o.org_id IN ({}))",
                user_col,
                placeholders(self.org_ids.len())
            ));
            params.extend(self.org_ids.iter().map(|id| Value::Integer(*id)));
        }

        clause
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
