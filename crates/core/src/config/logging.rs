use serde::{Deserialize, Serialize};

use super::validation::ConfigValidator;
use crate::{SchedulerError, SchedulerResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` 或 `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl ConfigValidator for LoggingConfig {
    fn validate(&self) -> SchedulerResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(SchedulerError::Configuration(format!(
                "Invalid log level: {}",
                self.level
            )));
        }

        if !matches!(self.format.as_str(), "pretty" | "json") {
            return Err(SchedulerError::Configuration(format!(
                "Invalid log format: {}",
                self.format
            )));
        }

        Ok(())
    }
}
