//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::GradebookError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), GradebookError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, GradebookError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| GradebookError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), GradebookError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), GradebookError> {
    conn.execute_batch(GRADES_SCHEMA)
        .map_err(|e| GradebookError::Internal(format!("Failed to create grade tables: {}", e)))?;

    conn.execute_batch(ROSTER_SCHEMA)
        .map_err(|e| GradebookError::Internal(format!("Failed to create roster tables: {}", e)))?;

    conn.execute_batch(PROGRESS_SCHEMA)
        .map_err(|e| GradebookError::Internal(format!("Failed to create progress tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| GradebookError::Internal(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

/// Grade cache and audit ledger
const GRADES_SCHEMA: &str = r#"
-- Cached result of the grading engine, one row per user and course
CREATE TABLE IF NOT EXISTS grade_records (
    user_id INTEGER NOT NULL,
    course_id TEXT NOT NULL,
    grade REAL NOT NULL,
    proforma_grade REAL NOT NULL,

    -- Serialized blobs produced by the grading engine
    progress_summary TEXT NOT NULL DEFAULT '',
    grade_summary TEXT NOT NULL,
    grading_policy TEXT NOT NULL,

    created TEXT NOT NULL,
    modified TEXT NOT NULL,
    UNIQUE (user_id, course_id)
);

-- Never updated or deleted
CREATE TABLE IF NOT EXISTS grade_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    course_id TEXT NOT NULL,
    grade REAL NOT NULL,
    proforma_grade REAL NOT NULL,
    progress_summary TEXT NOT NULL DEFAULT '',
    grade_summary TEXT NOT NULL,
    grading_policy TEXT NOT NULL,
    created TEXT NOT NULL
);
"#;

/// Mirror of the external enrollment store
const ROSTER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY NOT NULL,
    username TEXT NOT NULL,
    email TEXT NOT NULL DEFAULT '',
    full_name TEXT NOT NULL DEFAULT '',
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS enrollments (
    user_id INTEGER NOT NULL,
    course_id TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_staff INTEGER NOT NULL DEFAULT 0,
    created TEXT NOT NULL,
    PRIMARY KEY (user_id, course_id)
);

CREATE TABLE IF NOT EXISTS user_groups (
    user_id INTEGER NOT NULL,
    group_id INTEGER NOT NULL,
    PRIMARY KEY (user_id, group_id)
);

CREATE TABLE IF NOT EXISTS user_organizations (
    user_id INTEGER NOT NULL,
    org_id INTEGER NOT NULL,
    PRIMARY KEY (user_id, org_id)
);
"#;

/// Mirror of the external progress store
const PROGRESS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS course_starts (
    user_id INTEGER NOT NULL,
    course_id TEXT NOT NULL,
    started_at TEXT NOT NULL,
    PRIMARY KEY (user_id, course_id)
);

CREATE TABLE IF NOT EXISTS module_completions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    course_id TEXT NOT NULL,
    module_id TEXT NOT NULL,
    completed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS module_interactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    course_id TEXT NOT NULL,
    module_id TEXT NOT NULL,
    interacted_at TEXT NOT NULL
);
"#;

/// Index definitions for fast queries
const INDEXES_SCHEMA: &str = r#"
-- Grade indexes
CREATE INDEX IF NOT EXISTS idx_grade_records_course ON grade_records(course_id);
CREATE INDEX IF NOT EXISTS idx_grade_records_rank ON grade_records(course_id, grade DESC, modified);
CREATE INDEX IF NOT EXISTS idx_grade_records_modified ON grade_records(modified);
CREATE INDEX IF NOT EXISTS idx_grade_history_latest ON grade_history(user_id, course_id, created);

-- Roster indexes
CREATE INDEX IF NOT EXISTS idx_enrollments_course ON enrollments(course_id, is_active);
CREATE INDEX IF NOT EXISTS idx_enrollments_created ON enrollments(course_id, created);
CREATE INDEX IF NOT EXISTS idx_user_groups_group ON user_groups(group_id);
CREATE INDEX IF NOT EXISTS idx_user_organizations_org ON user_organizations(org_id);

-- Progress indexes
CREATE INDEX IF NOT EXISTS idx_course_starts_course ON course_starts(course_id, started_at);
CREATE INDEX IF NOT EXISTS idx_module_completions_course ON module_completions(course_id, completed_at);
CREATE INDEX IF NOT EXISTS idx_module_interactions_course ON module_interactions(course_id, interacted_at);
"#;
