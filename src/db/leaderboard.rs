//! Course leaderboards and user positions
//!
//! Ranking order is `grade` descending, then `modified` ascending: of two
//! users with the same grade, the one who reached it first ranks higher.
//! Position lookups count rows under exactly the same relation, so a user's
//! position always agrees with where the leaderboard would list them.

use chrono::{DateTime, Utc};
use rusqlite::{params_from_iter, types::Value, Connection};
use serde::Serialize;
use tracing::{debug, warn};

use super::grade_records;
use super::models::{format_timestamp, timestamp_column, ScopeFilter};
use super::roster;
use crate::error::GradebookError;

/// Default number of rows on a leaderboard
pub const DEFAULT_LEADERBOARD_COUNT: u32 = 3;

/// One ranked user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardRow {
    pub user_id: i64,
    pub username: String,
    pub grade: f64,
    pub modified: DateTime<Utc>,
}

/// Leaderboard plus course-wide grade aggregates
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Leaderboard {
    pub course_avg: f64,
    pub course_max: f64,
    pub course_min: f64,
    pub course_count: u64,
    pub rows: Vec<LeaderboardRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_grade: Option<f64>,
}

/// A user's rank within the eligible population
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UserPosition {
    pub user_position: u64,
    pub user_grade: f64,
}

/// Leaderboard request
#[derive(Debug, Clone)]
pub struct LeaderboardQuery {
    pub course_id: String,
    pub count: u32,
    pub scope: ScopeFilter,
    pub user_id: Option<i64>,
}

impl LeaderboardQuery {
    pub fn new(course_id: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            count: DEFAULT_LEADERBOARD_COUNT,
            scope: ScopeFilter::default(),
            user_id: None,
        }
    }

    pub fn top(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn scope(mut self, scope: ScopeFilter) -> Self {
        self.scope = scope;
        self
    }

    pub fn for_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// Round to three decimal places
fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Scale the average over recorded grades to the whole enrolled population.
///
/// Enrolled users without a grade record never submitted scored work, so
/// they count as zeros: `raw_avg * recorded / enrolled`.
pub fn corrected_average(raw_avg: f64, recorded_count: u64, total_enrolled: u64) -> f64 {
    if recorded_count == 0 || total_enrolled == 0 {
        return 0.0;
    }
    round3(raw_avg * recorded_count as f64 / total_enrolled as f64)
}

struct Aggregates {
    count: u64,
    avg: Option<f64>,
    max: Option<f64>,
    min: Option<f64>,
}

fn aggregates(
    conn: &Connection,
    course_id: &str,
    scope: &ScopeFilter,
) -> Result<Aggregates, GradebookError> {
    let mut values = vec![Value::Text(course_id.to_string())];
    let clause = scope.eligible_clause("r.user_id", course_id, &mut values);
    let sql = format!(
        "SELECT COUNT(*), AVG(r.grade), MAX(r.grade), MIN(r.grade) \
         FROM grade_records r WHERE r.course_id = ? AND {}",
        clause
    );

    let aggregates = conn.query_row(&sql, params_from_iter(values.iter()), |row| {
        Ok(Aggregates {
            count: row.get::<_, i64>(0)? as u64,
            avg: row.get(1)?,
            max: row.get(2)?,
            min: row.get(3)?,
        })
    })?;
    Ok(aggregates)
}

fn top_rows(
    conn: &Connection,
    course_id: &str,
    scope: &ScopeFilter,
    count: u32,
) -> Result<Vec<LeaderboardRow>, GradebookError> {
    let mut values = vec![Value::Text(course_id.to_string())];
    let clause = scope.eligible_clause("r.user_id", course_id, &mut values);
    values.push(Value::Integer(count as i64));
    let sql = format!(
        "SELECT r.user_id AS user_id, u.username AS username, r.grade AS grade, r.modified AS modified \
         FROM grade_records r JOIN users u ON u.id = r.user_id \
         WHERE r.course_id = ? AND {} \
         ORDER BY r.grade DESC, r.modified ASC, r.user_id ASC LIMIT ?",
        clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), |row| {
            Ok(LeaderboardRow {
                user_id: row.get("user_id")?,
                username: row.get("username")?,
                grade: row.get("grade")?,
                modified: timestamp_column(row, "modified")?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Build the leaderboard for a course
pub fn generate_leaderboard(
    conn: &Connection,
    query: &LeaderboardQuery,
) -> Result<Leaderboard, GradebookError> {
    let course_id = query.course_id.as_str();

    let total_enrolled =
        roster::active_users_in(conn, course_id, &query.scope.excluded_users)?.len() as u64;
    if total_enrolled == 0 {
        debug!(course_id, "No enrolled users, empty leaderboard");
        return Ok(Leaderboard::default());
    }

    let orphans = roster::orphaned_record_users(conn, course_id)?;
    if !orphans.is_empty() {
        let err = GradebookError::InconsistentState(format!(
            "{} grade record(s) in {} reference inactive or unenrolled users",
            orphans.len(),
            course_id
        ));
        warn!(users = ?orphans, "{}; treating them as excluded", err);
    }

    let mut board = Leaderboard::default();

    // Group and org filters narrow the rows and the position, never the course figures
    let course_scope = ScopeFilter::new().excluding(query.scope.excluded_users.iter().copied());
    let agg = aggregates(conn, course_id, &course_scope)?;
    if agg.count > 0 {
        if let Some(avg) = agg.avg {
            board.course_avg = corrected_average(avg, agg.count, total_enrolled);
            board.course_max = agg.max.unwrap_or(0.0);
            board.course_min = agg.min.unwrap_or(0.0);
            board.course_count = agg.count;
        }
        board.rows = top_rows(conn, course_id, &query.scope, query.count)?;
    }

    if let Some(user_id) = query.user_id {
        let position = get_user_position(conn, course_id, user_id, &query.scope)?;
        board.user_position = Some(position.user_position);
        board.user_grade = Some(position.user_grade);
    }

    debug!(
        course_id,
        total_enrolled,
        recorded = agg.count,
        course_avg = board.course_avg,
        "Leaderboard generated"
    );

    Ok(board)
}

/// Position of a user on the course leaderboard
pub fn get_user_position(
    conn: &Connection,
    course_id: &str,
    user_id: i64,
    scope: &ScopeFilter,
) -> Result<UserPosition, GradebookError> {
    get_user_position_at(conn, course_id, user_id, scope, Utc::now())
}

/// Position of a user as of `now`.
///
/// A user without a grade record ranks as if they scored zero at `now`.
pub fn get_user_position_at(
    conn: &Connection,
    course_id: &str,
    user_id: i64,
    scope: &ScopeFilter,
    now: DateTime<Utc>,
) -> Result<UserPosition, GradebookError> {
    let (user_grade, user_modified) = match grade_records::find(conn, user_id, course_id)? {
        Some(record) => (record.grade, record.modified),
        None => (0.0, now),
    };

    let user_modified = format_timestamp(&user_modified);
    let mut values = vec![
        Value::Text(course_id.to_string()),
        Value::Real(user_grade),
        Value::Real(user_grade),
        Value::Text(user_modified.clone()),
        Value::Real(user_grade),
        Value::Text(user_modified),
        Value::Integer(user_id),
    ];
    let clause = scope.eligible_clause("r.user_id", course_id, &mut values);
    let sql = format!(
        "SELECT COUNT(*) FROM grade_records r WHERE r.course_id = ? \
         AND (r.grade > ? OR (r.grade = ? AND r.modified < ?) \
              OR (r.grade = ? AND r.modified = ? AND r.user_id < ?)) \
         AND {}",
        clause
    );

    let above: i64 = conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;

    Ok(UserPosition {
        user_position: above as u64 + 1,
        user_grade,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::grade_records::{upsert_at, GradeRecordInput};
    use crate::db::roster::{add_to_group, enroll, upsert_user, UserInput};
    use crate::db::GradebookDb;
    use chrono::{Duration, TimeZone};

    const COURSE: &str = "course-v1:Org+RANK+2024";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap()
    }

    fn enroll_user(db: &GradebookDb, id: i64) {
        db.with_conn(|conn| {
            upsert_user(conn, &UserInput::new(id, format!("student{}", id)))?;
            enroll(conn, id, COURSE, t0())
        })
        .unwrap();
    }

    fn grade(db: &GradebookDb, id: i64, grade: f64, at: DateTime<Utc>) {
        let input = GradeRecordInput {
            user_id: id,
            course_id: COURSE.into(),
            grade,
            proforma_grade: grade,
            progress_summary: String::new(),
            grade_summary: "{}".into(),
            grading_policy: "{}".into(),
        };
        db.with_conn_mut(|conn| upsert_at(conn, &input, at)).unwrap();
    }

    #[test]
    fn test_average_correction_folds_in_missing_zeros() {
        let db = GradebookDb::open_in_memory().unwrap();
        for id in 1..=5 {
            enroll_user(&db, id);
        }
        grade(&db, 1, 0.9, t0());
        grade(&db, 2, 0.8, t0());
        grade(&db, 3, 0.8, t0());

        let board = db
            .with_conn(|conn| generate_leaderboard(conn, &LeaderboardQuery::new(COURSE)))
            .unwrap();

        assert_eq!(board.course_avg, 0.5);
        assert_eq!(board.course_max, 0.9);
        assert_eq!(board.course_min, 0.8);
        assert_eq!(board.course_count, 3);
        assert_eq!(board.rows.len(), 3);
    }

    #[test]
    fn test_tie_break_earlier_modified_ranks_higher() {
        let db = GradebookDb::open_in_memory().unwrap();
        for id in 1..=3 {
            enroll_user(&db, id);
        }
        grade(&db, 1, 0.8, t0() + Duration::minutes(10));
        grade(&db, 2, 0.8, t0());
        grade(&db, 3, 0.5, t0());

        let board = db
            .with_conn(|conn| generate_leaderboard(conn, &LeaderboardQuery::new(COURSE).top(10)))
            .unwrap();
        let order: Vec<i64> = board.rows.iter().map(|r| r.user_id).collect();
        assert_eq!(order, vec![2, 1, 3]);
        assert_eq!(board.rows[0].username, "student2");
    }

    #[test]
    fn test_position_matches_leaderboard_rank() {
        let db = GradebookDb::open_in_memory().unwrap();
        for id in 1..=6 {
            enroll_user(&db, id);
        }
        grade(&db, 1, 0.7, t0());
        grade(&db, 2, 0.9, t0() + Duration::minutes(3));
        grade(&db, 3, 0.9, t0() + Duration::minutes(1));
        grade(&db, 4, 0.7, t0() - Duration::minutes(1));
        grade(&db, 5, 0.2, t0());

        let board = db
            .with_conn(|conn| generate_leaderboard(conn, &LeaderboardQuery::new(COURSE).top(10)))
            .unwrap();

        for (rank, row) in board.rows.iter().enumerate() {
            let position = db
                .with_conn(|conn| get_user_position(conn, COURSE, row.user_id, &ScopeFilter::new()))
                .unwrap();
            assert_eq!(position.user_position, rank as u64 + 1, "user {}", row.user_id);
            assert_eq!(position.user_grade, row.grade);
        }
    }

    #[test]
    fn test_ungraded_user_ranks_last() {
        let db = GradebookDb::open_in_memory().unwrap();
        for id in 1..=3 {
            enroll_user(&db, id);
        }
        grade(&db, 1, 0.4, t0());
        grade(&db, 2, 0.0, t0());

        let board = db
            .with_conn(|conn| generate_leaderboard(conn, &LeaderboardQuery::new(COURSE).for_user(3)))
            .unwrap();
        // zero recorded earlier than "now" stays ahead of the ungraded user
        assert_eq!(board.user_position, Some(3));
        assert_eq!(board.user_grade, Some(0.0));
    }

    #[test]
    fn test_excluded_users_removed_everywhere() {
        let db = GradebookDb::open_in_memory().unwrap();
        for id in 1..=4 {
            enroll_user(&db, id);
        }
        grade(&db, 1, 1.0, t0());
        grade(&db, 2, 0.6, t0());
        grade(&db, 3, 0.4, t0());

        let query = LeaderboardQuery::new(COURSE)
            .scope(ScopeFilter::new().excluding([1]))
            .for_user(3);
        let board = db.with_conn(|conn| generate_leaderboard(conn, &query)).unwrap();

        // (0.6 + 0.4) / 2 * 2 / 3
        assert_eq!(board.course_avg, 0.333);
        assert_eq!(board.course_max, 0.6);
        assert!(board.rows.iter().all(|r| r.user_id != 1));
        assert_eq!(board.user_position, Some(2));
    }

    #[test]
    fn test_group_filter_dedups_members() {
        let db = GradebookDb::open_in_memory().unwrap();
        for id in 1..=3 {
            enroll_user(&db, id);
        }
        db.with_conn(|conn| {
            add_to_group(conn, 1, 7)?;
            add_to_group(conn, 1, 8)?;
            add_to_group(conn, 2, 8)
        })
        .unwrap();
        grade(&db, 1, 0.9, t0());
        grade(&db, 2, 0.5, t0());
        grade(&db, 3, 0.7, t0());

        let query = LeaderboardQuery::new(COURSE)
            .top(10)
            .scope(ScopeFilter::new().in_groups([7, 8]));
        let board = db.with_conn(|conn| generate_leaderboard(conn, &query)).unwrap();

        let order: Vec<i64> = board.rows.iter().map(|r| r.user_id).collect();
        assert_eq!(order, vec![1, 2]);
        assert_eq!(board.course_count, 3);
    }

    #[test]
    fn test_group_filter_narrows_rows_not_course_figures() {
        let db = GradebookDb::open_in_memory().unwrap();
        for id in 1..=10 {
            enroll_user(&db, id);
            grade(&db, id, 1.0, t0());
        }
        db.with_conn(|conn| {
            add_to_group(conn, 1, 7)?;
            add_to_group(conn, 2, 7)
        })
        .unwrap();

        let query = LeaderboardQuery::new(COURSE)
            .top(10)
            .scope(ScopeFilter::new().in_groups([7]))
            .for_user(2);
        let board = db.with_conn(|conn| generate_leaderboard(conn, &query)).unwrap();

        assert_eq!(board.course_avg, 1.0);
        assert_eq!(board.course_max, 1.0);
        assert_eq!(board.course_min, 1.0);
        assert_eq!(board.course_count, 10);
        let order: Vec<i64> = board.rows.iter().map(|r| r.user_id).collect();
        assert_eq!(order, vec![1, 2]);
        assert_eq!(board.user_position, Some(2));
    }

    #[test]
    fn test_deactivated_account_still_counts_as_enrolled() {
        let db = GradebookDb::open_in_memory().unwrap();
        for id in 1..=5 {
            enroll_user(&db, id);
        }
        let deactivated = UserInput {
            is_active: false,
            ..UserInput::new(5, "student5")
        };
        db.with_conn(|conn| upsert_user(conn, &deactivated)).unwrap();
        grade(&db, 1, 0.9, t0());
        grade(&db, 2, 0.8, t0());
        grade(&db, 3, 0.8, t0());

        let board = db
            .with_conn(|conn| generate_leaderboard(conn, &LeaderboardQuery::new(COURSE)))
            .unwrap();

        // 2.5 / 5, not 2.5 / 4
        assert_eq!(board.course_avg, 0.5);
        assert_eq!(board.course_count, 3);
    }

    #[test]
    fn test_empty_course_is_all_zero() {
        let db = GradebookDb::open_in_memory().unwrap();
        let board = db
            .with_conn(|conn| generate_leaderboard(conn, &LeaderboardQuery::new(COURSE).for_user(1)))
            .unwrap();
        assert_eq!(board, Leaderboard::default());
    }

    #[test]
    fn test_records_of_unenrolled_users_are_ignored() {
        let db = GradebookDb::open_in_memory().unwrap();
        enroll_user(&db, 1);
        grade(&db, 1, 0.5, t0());
        // user 2 has a record but no enrollment
        grade(&db, 2, 0.99, t0());

        let board = db
            .with_conn(|conn| generate_leaderboard(conn, &LeaderboardQuery::new(COURSE)))
            .unwrap();
        assert_eq!(board.course_count, 1);
        assert_eq!(board.rows.len(), 1);
        assert_eq!(board.rows[0].user_id, 1);
    }

    #[test]
    fn test_corrected_average_rounding() {
        assert_eq!(corrected_average(0.8333333, 3, 5), 0.5);
        assert_eq!(corrected_average(0.5, 0, 5), 0.0);
        assert_eq!(corrected_average(0.6667, 1, 1), 0.667);
    }
}
