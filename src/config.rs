use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{debates::verdicts::RetryPolicy, error::ArenaError};

/// Runtime configuration. Every field has a default, so an empty (or absent)
/// configuration file is valid.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ArenaConfig {
    pub database_url: String,
    pub pool_size: u32,
    /// How often the deadline sweep runs.
    pub sweep_interval_secs: u64,
    pub verdict_timeout_secs: u64,
    pub verdict_max_attempts: u32,
    pub verdict_retry_backoff_ms: u64,
    /// How long a debate may wait for a verdict before the follow-up sweep
    /// asks for one again.
    pub verdict_retry_after_secs: i64,
    pub log_filter: String,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            database_url: ":memory:".to_string(),
            pool_size: 10,
            sweep_interval_secs: 60,
            verdict_timeout_secs: 30,
            verdict_max_attempts: 3,
            verdict_retry_backoff_ms: 2_000,
            verdict_retry_after_secs: 15 * 60,
            log_filter: "info".to_string(),
        }
    }
}

impl ArenaConfig {
    /// Loads the configuration from a TOML file (if one is given), then
    /// applies the `DATABASE_URL` environment variable on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ArenaError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    ArenaError::validation(format!(
                        "could not read {}: {e}",
                        path.display()
                    ))
                })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ArenaError> {
        let config: Self = toml::from_str(text).map_err(|e| {
            ArenaError::validation(format!("invalid configuration: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ArenaError> {
        if self.pool_size == 0 {
            return Err(ArenaError::validation("pool_size must be positive"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ArenaError::validation(
                "sweep_interval_secs must be positive",
            ));
        }
        if self.verdict_max_attempts == 0 {
            return Err(ArenaError::validation(
                "verdict_max_attempts must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn verdict_retry_after(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::seconds(self.verdict_retry_after_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(self.verdict_timeout_secs),
            max_attempts: self.verdict_max_attempts,
            backoff: Duration::from_millis(self.verdict_retry_backoff_ms),
        }
    }
}
