use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Subreddits to monitor; combined into a single feed.
    pub subreddits: Vec<String>,
    /// Only admit posts mentioning one of these. Empty admits everything.
    pub keywords: Vec<String>,
    pub poll_interval_secs: u64,
    pub tracking_duration_hours: u64,
    pub rate_limit_secs: f64,
    pub stream_backoff_secs: u64,
    pub stream_poll_secs: u64,
    pub comment_limit: usize,
    pub data_dir: PathBuf,
    pub user_agent: String,
    pub cumulative_stats: bool,
    pub debug: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            subreddits: vec!["all".to_string()],
            keywords: Vec::new(),
            poll_interval_secs: 300,
            tracking_duration_hours: 24,
            rate_limit_secs: 2.0,
            stream_backoff_secs: 60,
            stream_poll_secs: 30,
            comment_limit: 10,
            data_dir: PathBuf::from("data"),
            user_agent: "removal-tracker/0.1".to_string(),
            cumulative_stats: false,
            debug: false,
        }
    }
}

impl TrackerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        let config = Self::from_toml(&raw)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subreddits.iter().all(|s| s.trim().is_empty()) {
            return Err(ConfigError::ValidationFailed {
                reason: "at least one subreddit must be configured".to_string(),
            });
        }
        if self.poll_interval_secs == 0 {
            return Err(invalid("poll_interval_secs", self.poll_interval_secs));
        }
        if self.tracking_duration_hours == 0 {
            return Err(invalid(
                "tracking_duration_hours",
                self.tracking_duration_hours,
            ));
        }
        if !self.rate_limit_secs.is_finite() || self.rate_limit_secs < 0.0 {
            return Err(invalid("rate_limit_secs", self.rate_limit_secs));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn tracking_duration(&self) -> chrono::Duration {
        chrono::Duration::hours(self.tracking_duration_hours as i64)
    }

    pub fn rate_limit_interval(&self) -> Duration {
        Duration::from_secs_f64(self.rate_limit_secs)
    }

    pub fn stream_backoff(&self) -> Duration {
        Duration::from_secs(self.stream_backoff_secs)
    }

    pub fn stream_poll_interval(&self) -> Duration {
        Duration::from_secs(self.stream_poll_secs)
    }
}

fn invalid(field: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}
