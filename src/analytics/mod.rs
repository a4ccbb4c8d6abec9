//! Course analytics computed from the grade cache and roster mirrors

pub mod time_series;

pub use time_series::{
    buckets, Bucket, Interval, SeriesPoint, SeriesQuery, TimeSeriesAggregator, TimeSeriesMetrics,
};
