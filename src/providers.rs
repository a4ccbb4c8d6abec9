//! Collaborator interfaces
//!
//! The grading engine, letter-grade cutoffs, enrollment and progress stores
//! and the manual-grading annotator all live outside this crate. The
//! analytics talk to them through these traits. `GradebookDb` implements the
//! enrollment and progress traits over its mirrored roster tables.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::ScopeFilter;
use crate::error::GradebookError;
use crate::summary::GradebookEntry;

/// Output of the grading engine for one user and course
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputedGrade {
    pub grade: f64,
    pub proforma_grade: f64,
    #[serde(default)]
    pub progress_summary: serde_json::Value,
    #[serde(default)]
    pub grade_summary: serde_json::Value,
    #[serde(default)]
    pub grading_policy: serde_json::Value,
}

/// Computes a student's raw grade from course content and responses
pub trait GradingEngine: Send + Sync {
    fn compute_grade(&self, user_id: i64, course_id: &str) -> Result<ComputedGrade, GradebookError>;
}

/// Maps a percentage onto a course's letter grades
pub trait LetterGradeLookup {
    /// `ordered_cutoffs` is sorted by threshold, highest first
    fn lookup(&self, percent: f64, ordered_cutoffs: &[(String, f64)]) -> Option<String>;
}

/// A user-level event with the time it happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActivityEvent {
    pub user_id: i64,
    pub at: DateTime<Utc>,
}

/// Enrolled student as listed in a course gradebook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub full_name: String,
}

/// Enrollment store
pub trait EnrollmentProvider {
    /// Users with an active enrollment in the course, whatever the account state
    fn active_users_in(
        &self,
        course_id: &str,
        excluding: &[i64],
    ) -> Result<BTreeSet<i64>, GradebookError>;

    /// Enrollments of eligible users created before `until`
    fn enrollment_events(
        &self,
        course_id: &str,
        scope: &ScopeFilter,
        until: DateTime<Utc>,
    ) -> Result<Vec<ActivityEvent>, GradebookError>;

    /// Enrolled students without a staff role, ordered by username
    fn non_staff_students(&self, course_id: &str) -> Result<Vec<Student>, GradebookError>;
}

/// Progress tracking store
pub trait ProgressProvider {
    /// First-activity events of eligible users before `until`
    fn start_events(
        &self,
        course_id: &str,
        scope: &ScopeFilter,
        until: DateTime<Utc>,
    ) -> Result<Vec<ActivityEvent>, GradebookError>;

    /// Module completions in `[from, until)`
    fn module_completion_events(
        &self,
        course_id: &str,
        scope: &ScopeFilter,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<ActivityEvent>, GradebookError>;

    /// Module interactions in `[from, until)`
    fn module_interaction_events(
        &self,
        course_id: &str,
        scope: &ScopeFilter,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<ActivityEvent>, GradebookError>;
}

/// Patches manually graded assessments into a cohort of gradebook entries.
///
/// `seed_index` is the position the richest entry held before it was moved to
/// the front, and `module_count` its `manual_graded_total_count`.
pub trait ManualGradingAnnotator {
    fn annotate(
        &self,
        entries: Vec<GradebookEntry>,
        seed_index: Option<usize>,
        module_count: u32,
    ) -> Vec<GradebookEntry>;
}

/// Annotator for deployments without manual grading
#[derive(Debug, Default, Clone, Copy)]
pub struct NoManualGrading;

impl ManualGradingAnnotator for NoManualGrading {
    fn annotate(
        &self,
        entries: Vec<GradebookEntry>,
        _seed_index: Option<usize>,
        _module_count: u32,
    ) -> Vec<GradebookEntry> {
        entries
    }
}
