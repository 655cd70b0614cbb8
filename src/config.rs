//! Simulator Configuration
//!
//! Features:
//! - Sensible defaults
//! - Environment variable overrides
//! - Configuration validation
//! - Builder for programmatic setup

use crate::error::{Error, Result};
use crate::transaction::VictimPolicy;
use serde::{Deserialize, Serialize};

/// Output layout of the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "full" => Ok(LogFormat::Full),
            "compact" => Ok(LogFormat::Compact),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(Error::ConfigError(format!("Invalid log format: {}", s))),
        }
    }
}

/// Complete simulator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Which participant of a deadlock gets aborted
    pub victim_policy: VictimPolicy,

    /// Keep the chronological event trace in the run report
    pub record_trace: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            victim_policy: VictimPolicy::LowestId,
            record_trace: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (full, compact, pretty)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Full,
        }
    }
}

impl SimulatorConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Override with environment variables
        config.apply_env_overrides()?;

        // Validate
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        // Scheduler
        if let Ok(policy) = std::env::var("LOCKSIM_VICTIM_POLICY") {
            self.scheduler.victim_policy = policy.parse()?;
        }
        if let Ok(record) = std::env::var("LOCKSIM_RECORD_TRACE") {
            self.scheduler.record_trace = record
                .parse()
                .map_err(|_| Error::ConfigError("Invalid LOCKSIM_RECORD_TRACE".to_string()))?;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(level) = std::env::var("LOCKSIM_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOCKSIM_LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(Error::ConfigError(format!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }
}

/// Configuration builder for programmatic setup
pub struct ConfigBuilder {
    config: SimulatorConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SimulatorConfig::default(),
        }
    }

    pub fn with_victim_policy(mut self, policy: VictimPolicy) -> Self {
        self.config.scheduler.victim_policy = policy;
        self
    }

    pub fn with_record_trace(mut self, record: bool) -> Self {
        self.config.scheduler.record_trace = record;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.config.logging.format = format;
        self
    }

    pub fn build(self) -> Result<SimulatorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
