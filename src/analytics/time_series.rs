//! Bucketed course metrics over a time range
//!
//! `[start, end)` is split into buckets of one interval each, left-aligned to
//! `start`; the last bucket is clipped at `end`. Every series reports one
//! count per bucket.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{completion, GradebookDb, ScopeFilter};
use crate::error::GradebookError;
use crate::providers::{ActivityEvent, EnrollmentProvider, ProgressProvider};

/// Guard against accidental multi-decade daily series
pub const MAX_BUCKETS: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Day,
    Week,
    Month,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Day => "day",
            Interval::Week => "week",
            Interval::Month => "month",
        }
    }

    /// Start of the bucket `index` intervals after `origin`
    fn offset(&self, origin: DateTime<Utc>, index: u32) -> Option<DateTime<Utc>> {
        match self {
            Interval::Day => origin.checked_add_signed(Duration::days(index as i64)),
            Interval::Week => origin.checked_add_signed(Duration::weeks(index as i64)),
            Interval::Month => origin.checked_add_months(Months::new(index)),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = GradebookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "days" => Ok(Interval::Day),
            "week" | "weeks" => Ok(Interval::Week),
            "month" | "months" => Ok(Interval::Month),
            other => Err(GradebookError::Validation(format!(
                "Unsupported interval '{}', expected day, week or month",
                other
            ))),
        }
    }
}

/// Half-open time bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Split `[start, end)` into interval-wide buckets
pub fn buckets(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Interval,
) -> Result<Vec<Bucket>, GradebookError> {
    if end < start {
        return Err(GradebookError::Validation(format!(
            "end {} is before start {}",
            end, start
        )));
    }

    let mut out = Vec::new();
    let mut index = 0u32;
    let mut bucket_start = start;
    while bucket_start < end {
        if out.len() >= MAX_BUCKETS {
            return Err(GradebookError::Validation(format!(
                "range {} to {} needs more than {} {} buckets",
                start, end, MAX_BUCKETS, interval
            )));
        }
        index += 1;
        let next = interval
            .offset(start, index)
            .ok_or_else(|| GradebookError::Validation("time range out of bounds".into()))?;
        let bucket_end = next.min(end);
        out.push(Bucket {
            start: bucket_start,
            end: bucket_end,
        });
        bucket_start = bucket_end;
    }
    Ok(out)
}

/// Index of the bucket containing `at`, if any
fn bucket_index(buckets: &[Bucket], at: DateTime<Utc>) -> Option<usize> {
    let idx = buckets.partition_point(|b| b.start <= at);
    if idx == 0 {
        return None;
    }
    let bucket = &buckets[idx - 1];
    (at < bucket.end).then_some(idx - 1)
}

/// Distinct users per bucket
fn distinct_users_per_bucket(buckets: &[Bucket], events: &[ActivityEvent]) -> Vec<u64> {
    let mut seen: Vec<HashSet<i64>> = vec![HashSet::new(); buckets.len()];
    for event in events {
        if let Some(i) = bucket_index(buckets, event.at) {
            seen[i].insert(event.user_id);
        }
    }
    seen.into_iter().map(|s| s.len() as u64).collect()
}

/// Raw events per bucket
fn events_per_bucket(buckets: &[Bucket], events: &[ActivityEvent]) -> Vec<u64> {
    let mut counts = vec![0u64; buckets.len()];
    for event in events {
        if let Some(i) = bucket_index(buckets, event.at) {
            counts[i] += 1;
        }
    }
    counts
}

/// One value of a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeriesPoint {
    pub bucket_start: DateTime<Utc>,
    pub count: u64,
}

/// All series for one course and range
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimeSeriesMetrics {
    pub enrolled: Vec<SeriesPoint>,
    pub started: Vec<SeriesPoint>,
    pub completed: Vec<SeriesPoint>,
    pub modules_completed: Vec<SeriesPoint>,
    pub active_users: Vec<SeriesPoint>,
    pub not_started: Vec<SeriesPoint>,
}

/// Series request
#[derive(Debug, Clone)]
pub struct SeriesQuery {
    pub course_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub interval: Interval,
    pub scope: ScopeFilter,
}

/// Builds time series from the grade cache and the enrollment/progress stores
pub struct TimeSeriesAggregator<'a> {
    db: &'a GradebookDb,
    enrollments: &'a dyn EnrollmentProvider,
    progress: &'a dyn ProgressProvider,
    complete_match_range: f64,
}

impl<'a> TimeSeriesAggregator<'a> {
    /// Use the database's own roster mirror for enrollments and progress
    pub fn new(db: &'a GradebookDb, complete_match_range: f64) -> Self {
        Self {
            db,
            enrollments: db,
            progress: db,
            complete_match_range,
        }
    }

    pub fn with_providers(
        db: &'a GradebookDb,
        enrollments: &'a dyn EnrollmentProvider,
        progress: &'a dyn ProgressProvider,
        complete_match_range: f64,
    ) -> Self {
        Self {
            db,
            enrollments,
            progress,
            complete_match_range,
        }
    }

    pub fn build_series(&self, query: &SeriesQuery) -> Result<TimeSeriesMetrics, GradebookError> {
        let buckets = buckets(query.start, query.end, query.interval)?;
        if buckets.is_empty() {
            return Ok(TimeSeriesMetrics::default());
        }

        let course_id = query.course_id.as_str();
        let scope = &query.scope;
        let (start, end) = (query.start, query.end);

        let enrollments = self.enrollments.enrollment_events(course_id, scope, end)?;
        let starts = self.progress.start_events(course_id, scope, end)?;
        let completions = self.db.with_conn(|conn| {
            completion::completion_events(conn, course_id, scope, self.complete_match_range, start, end)
        })?;
        let modules = self.progress.module_completion_events(course_id, scope, start, end)?;

        // Activity counts as of a day earlier: an interaction at t lands in
        // the bucket containing t - 1 day.
        let shift = Duration::days(1);
        let activity: Vec<ActivityEvent> = self
            .progress
            .module_interaction_events(course_id, scope, start + shift, end + shift)?
            .into_iter()
            .map(|e| ActivityEvent { at: e.at - shift, ..e })
            .collect();

        let enrolled = distinct_users_per_bucket(&buckets, &enrollments);
        let started = distinct_users_per_bucket(&buckets, &starts);

        let distinct_before = |events: &[ActivityEvent]| -> u64 {
            events
                .iter()
                .filter(|e| e.at < start)
                .map(|e| e.user_id)
                .collect::<HashSet<_>>()
                .len() as u64
        };
        let mut total_enrolled = distinct_before(enrollments.as_slice());
        let mut total_started = distinct_before(starts.as_slice());

        let mut not_started = Vec::with_capacity(buckets.len());
        for i in 0..buckets.len() {
            total_enrolled += enrolled[i];
            total_started += started[i];
            not_started.push(total_enrolled.saturating_sub(total_started));
        }

        let to_points = |counts: Vec<u64>| -> Vec<SeriesPoint> {
            buckets
                .iter()
                .zip(counts)
                .map(|(b, count)| SeriesPoint {
                    bucket_start: b.start,
                    count,
                })
                .collect()
        };

        debug!(
            course_id,
            interval = %query.interval,
            buckets = buckets.len(),
            "Time series built"
        );

        Ok(TimeSeriesMetrics {
            completed: to_points(distinct_users_per_bucket(&buckets, &completions)),
            modules_completed: to_points(events_per_bucket(&buckets, &modules)),
            active_users: to_points(distinct_users_per_bucket(&buckets, &activity)),
            enrolled: to_points(enrolled),
            started: to_points(started),
            not_started: to_points(not_started),
        })
    }
}
