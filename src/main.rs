//! Gradebook analytics CLI
//!
//! ## Usage
//!
//! ```bash
//! # Cache a computed grade
//! echo '{"user_id": 7, "course_id": "course-v1:Org+C+2024", "grade": 0.82, "proforma_grade": 0.9}' \
//!     | gradebook-analytics record
//!
//! # Top 5 plus the position of user 7, ignoring two test accounts
//! gradebook-analytics leaderboard --course course-v1:Org+C+2024 --count 5 --user 7 --exclude 1 --exclude 2
//!
//! # Daily series for January
//! gradebook-analytics series --course course-v1:Org+C+2024 --start 2024-01-01 --end 2024-02-01 --interval day
//! ```
//!
//! All output is JSON on stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use gradebook_analytics::providers::ComputedGrade;
use gradebook_analytics::services::spawn_logging_listener;
use gradebook_analytics::{Config, GradebookDb, Interval, ScopeFilter, SeriesQuery, Services};

#[derive(Parser, Debug)]
#[command(name = "gradebook-analytics")]
#[command(about = "Grade cache and course analytics")]
struct Cli {
    /// Path to config file
    #[arg(short, long, env = "GRADEBOOK_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "GRADEBOOK_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Default)]
struct ScopeArgs {
    /// User to leave out (repeatable)
    #[arg(long = "exclude")]
    exclude: Vec<i64>,

    /// Only users in this group (repeatable)
    #[arg(long = "group")]
    groups: Vec<i64>,

    /// Only users in this organization (repeatable)
    #[arg(long = "org")]
    orgs: Vec<i64>,
}

impl ScopeArgs {
    fn to_filter(&self) -> ScopeFilter {
        ScopeFilter::new()
            .excluding(self.exclude.iter().copied())
            .in_groups(self.groups.iter().copied())
            .in_orgs(self.orgs.iter().copied())
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Cache a computed grade read as JSON from a file or stdin
    Record {
        /// Path to the grade JSON, or "-" for stdin
        #[arg(default_value = "-")]
        input: String,
    },

    /// Course leaderboard with aggregates
    Leaderboard {
        #[arg(long)]
        course: String,
        /// Rows to return (defaults to the configured count)
        #[arg(long)]
        count: Option<u32>,
        /// Also report this user's position
        #[arg(long)]
        user: Option<i64>,
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// One user's leaderboard position
    Position {
        #[arg(long)]
        course: String,
        #[arg(long)]
        user: i64,
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Number of users who completed the course
    Completed {
        #[arg(long)]
        course: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Bucketed enrollment, progress and completion series
    Series {
        #[arg(long)]
        course: String,
        /// RFC 3339 timestamp or YYYY-MM-DD (UTC midnight)
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long, default_value = "day")]
        interval: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Grade history for a user, newest first
    History {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        course: String,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Row counts
    Stats,
}

/// Input of the `record` subcommand
#[derive(Debug, Deserialize)]
struct RecordRequest {
    user_id: i64,
    course_id: String,
    #[serde(flatten)]
    computed: ComputedGrade,
}

fn parse_instant(value: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("'{}' is neither RFC 3339 nor YYYY-MM-DD", value))?;
    match date.and_hms_opt(0, 0, 0) {
        Some(naive) => Ok(naive.and_utc()),
        None => bail!("'{}' has no midnight", value),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("gradebook_analytics=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(dir) = cli.storage_dir {
        config.storage_dir = dir;
    }
    config.validate()?;

    info!(storage_dir = %config.storage_dir.display(), "Starting gradebook-analytics");

    let db = Arc::new(GradebookDb::open(&config.storage_dir)?);

    let config_path = config.config_path();
    if cli.config.is_none() && !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let services = Services::new(db.clone(), config);
    let listener = spawn_logging_listener(services.events.clone());
    let gradebook = services.gradebook.clone();

    match cli.command {
        Command::Record { input } => {
            let raw = if input == "-" {
                std::io::read_to_string(std::io::stdin())?
            } else {
                std::fs::read_to_string(&input).with_context(|| format!("reading {}", input))?
            };
            let request: RecordRequest =
                serde_json::from_str(&raw).context("parsing computed grade JSON")?;
            let result =
                gradebook.record_computed(request.user_id, &request.course_id, &request.computed)?;
            print_json(&result)?;
        }
        Command::Leaderboard {
            course,
            count,
            user,
            scope,
        } => {
            let mut query = gradebook.leaderboard_query(&course).scope(scope.to_filter());
            if let Some(count) = count {
                query = query.top(count);
            }
            if let Some(user) = user {
                query = query.for_user(user);
            }
            print_json(&gradebook.leaderboard(&query)?)?;
        }
        Command::Position { course, user, scope } => {
            print_json(&gradebook.user_position(&course, user, &scope.to_filter())?)?;
        }
        Command::Completed { course, scope } => {
            let completed = gradebook.count_completed(&course, &scope.to_filter())?;
            print_json(&serde_json::json!({ "course_id": course, "completed": completed }))?;
        }
        Command::Series {
            course,
            start,
            end,
            interval,
            scope,
        } => {
            let query = SeriesQuery {
                course_id: course,
                start: parse_instant(&start)?,
                end: parse_instant(&end)?,
                interval: interval.parse::<Interval>()?,
                scope: scope.to_filter(),
            };
            print_json(&gradebook.time_series(&query)?)?;
        }
        Command::History { user, course, limit } => {
            print_json(&gradebook.history(user, &course, limit)?)?;
        }
        Command::Stats => {
            print_json(&db.stats()?)?;
        }
    }

    // Close the bus so the listener drains and exits
    drop(gradebook);
    drop(services);
    if tokio::time::timeout(std::time::Duration::from_secs(1), listener)
        .await
        .is_err()
    {
        debug!("Event listener did not stop in time");
    }

    Ok(())
}
