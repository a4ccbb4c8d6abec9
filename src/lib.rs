//! Gradebook Analytics - grade cache and course analytics for a learning platform
//!
//! Keeps the latest computed grade per (user, course), an append-only
//! history of distinct grade states, and the course views built from them.
//!
//! ## Architecture
//!
//! - **Grade cache** (`db::grade_records`): one row per user and course,
//!   rewritten only when the grade changes
//! - **History ledger** (`db::history`): snapshot appended whenever any
//!   tracked field differs from the latest entry
//! - **Analytics**: leaderboard, user position, completion counts and
//!   bucketed time series over the cache and roster mirrors
//! - **Summary post-processing** (`summary`): letter grades and score
//!   descriptions for engine-produced grade summaries
//!
//! The grading engine, letter-grade tables, enrollment and progress stores
//! are external and reached through the traits in [`providers`].
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/gradebook-analytics/
//! ├── gradebook.db           # SQLite (WAL)
//! └── config.toml            # Configuration
//! ```

pub mod config;
pub mod error;
pub mod db;
pub mod providers;
pub mod analytics;
pub mod summary;
pub mod services;

// Re-exports
pub use config::Config;
pub use error::GradebookError;
pub use db::{GradebookDb, ScopeFilter};
pub use analytics::{Interval, SeriesQuery, TimeSeriesAggregator, TimeSeriesMetrics};
pub use summary::{CutoffTable, SummaryPostProcessor};
pub use services::{EventBus, GradebookEvent, GradebookService, Services};
