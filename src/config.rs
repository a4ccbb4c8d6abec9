//! Configuration for gradebook-analytics

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::GradebookError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gradebook-analytics")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the SQLite database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Tolerance when comparing proforma grade against grade for completion
    #[serde(default = "default_complete_match_range")]
    pub complete_match_range: f64,

    /// Number of leaderboard rows returned when the caller doesn't ask
    #[serde(default = "default_leaderboard_count")]
    pub leaderboard_count: u32,

    /// Buffered events per subscriber before lagging
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

fn default_complete_match_range() -> f64 {
    0.01
}

fn default_leaderboard_count() -> u32 {
    3
}

fn default_event_bus_capacity() -> usize {
    1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            complete_match_range: default_complete_match_range(),
            leaderboard_count: default_leaderboard_count(),
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GradebookError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| GradebookError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), GradebookError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| GradebookError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the analytics can't work with
    pub fn validate(&self) -> Result<(), GradebookError> {
        if !self.complete_match_range.is_finite() || self.complete_match_range < 0.0 {
            return Err(GradebookError::Config(format!(
                "complete_match_range must be a non-negative number, got {}",
                self.complete_match_range
            )));
        }
        if self.event_bus_capacity == 0 {
            return Err(GradebookError::Config(
                "event_bus_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Get SQLite database path
    pub fn db_path(&self) -> PathBuf {
        self.storage_dir.join("gradebook.db")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.complete_match_range, 0.01);
        assert_eq!(config.leaderboard_count, 3);
        assert!(config.db_path().ends_with("gradebook.db"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("leaderboard_count = 10").unwrap();
        assert_eq!(config.leaderboard_count, 10);
        assert_eq!(config.complete_match_range, 0.01);
        assert_eq!(config.event_bus_capacity, 1024);
    }

    #[test]
    fn test_negative_range_rejected() {
        let config = Config {
            complete_match_range: -0.5,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(GradebookError::Config(_))));
    }
}
