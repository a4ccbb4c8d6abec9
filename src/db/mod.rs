//! SQLite database module for the grade cache and analytics
//!
//! ## Tables
//!
//! - `grade_records` - One cached grade per (user, course)
//! - `grade_history` - Append-only snapshots of distinct grade states
//! - `users`, `enrollments`, `user_groups`, `user_organizations` - Roster mirror
//! - `course_starts`, `module_completions`, `module_interactions` - Progress mirror
//!
//! The roster and progress tables are written by the sync jobs that mirror the
//! external enrollment and progress stores. Analytics only read them.

pub mod schema;
pub mod models;
pub mod grade_records;
pub mod history;
pub mod roster;
pub mod progress;
pub mod leaderboard;
pub mod completion;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::GradebookError;

/// SQLite database for grade records, history and roster mirrors
pub struct GradebookDb {
    conn: Mutex<Connection>,
}

impl GradebookDb {
    /// Open or create the gradebook database
    pub fn open(storage_dir: &Path) -> Result<Self, GradebookError> {
        std::fs::create_dir_all(storage_dir)?;
        let db_path = storage_dir.join("gradebook.db");
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(&db_path)?;

        // WAL keeps analytics reads from blocking grade writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, GradebookError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<(), GradebookError> {
        self.with_conn(|conn| schema::init_schema(conn))
    }

    /// Run a read operation against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, GradebookError>
    where
        F: FnOnce(&Connection) -> Result<T, GradebookError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| GradebookError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, GradebookError>
    where
        F: FnOnce(&mut Connection) -> Result<T, GradebookError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| GradebookError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, GradebookError> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64, GradebookError> {
                let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                grade_record_count: count("SELECT COUNT(*) FROM grade_records")?,
                history_entry_count: count("SELECT COUNT(*) FROM grade_history")?,
                user_count: count("SELECT COUNT(*) FROM users")?,
                enrollment_count: count("SELECT COUNT(*) FROM enrollments")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub grade_record_count: u64,
    pub history_entry_count: u64,
    pub user_count: u64,
    pub enrollment_count: u64,
}

// Re-exports
pub use grade_records::{GradeRecord, GradeRecordInput, UpsertOutcome, UpsertResult};
pub use history::HistoryEntry;
pub use leaderboard::{Leaderboard, LeaderboardQuery, LeaderboardRow, UserPosition};
pub use models::ScopeFilter;
