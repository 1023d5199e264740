//! Configuration management for the Vigil monitoring agent
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files and environment variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Main configuration structure for the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Sampling and baseline learning configuration
    pub monitoring: MonitoringConfig,

    /// Automated response configuration
    pub response: ResponseConfig,

    /// Baseline persistence configuration
    pub persistence: PersistenceConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Sampling and baseline learning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Per-metric history capacity
    pub window_size: usize,

    /// Seconds between sampling passes
    pub sample_interval: u64,

    /// Seconds of learning before baselines may activate
    pub learning_period: u64,

    /// Z-score cutoff above which a sample is anomalous
    pub anomaly_threshold: f64,

    /// Minimum accumulated samples before a baseline activates
    pub min_samples: u64,

    /// Samples accumulated before outlier clipping engages
    pub outlier_warmup: u64,

    /// Learning samples beyond this many running stddevs are excluded
    pub outlier_clip_sigma: f64,

    /// Remote hosts monitored by ping latency
    pub monitored_hosts: Vec<String>,
}

/// Automated response configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Score at or above which an alert is sent
    pub alert_tier: f64,

    /// Score at or above which an attributable source is blocked
    pub block_tier: f64,

    /// Temperature (degrees C) at which shutdown triggers
    pub shutdown_temp: f64,

    /// Seconds allowed per external action call
    pub action_timeout: u64,

    /// Retry policy for transient action failures
    pub retry: RetryConfig,
}

/// Retry configuration for external actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per action
    pub max_attempts: u32,

    /// Base delay in seconds
    pub base_delay: u64,

    /// Maximum delay in seconds
    pub max_delay: u64,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

/// Baseline persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Path of the persisted baseline document
    pub baseline_path: PathBuf,

    /// Seconds between periodic baseline flushes
    pub flush_interval: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Emit JSON-formatted logs
    pub json: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            monitoring: MonitoringConfig::default(),
            response: ResponseConfig::default(),
            persistence: PersistenceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            window_size: 60,
            sample_interval: 5,
            learning_period: 300, // 5 minutes
            anomaly_threshold: 3.0,
            min_samples: 10,
            outlier_warmup: 8,
            outlier_clip_sigma: 5.0,
            monitored_hosts: vec!["8.8.8.8".to_string(), "1.1.1.1".to_string()],
        }
    }
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            alert_tier: 3.0,
            block_tier: 5.0,
            shutdown_temp: 80.0,
            action_timeout: 10,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: 1,
            max_delay: 60,
            backoff_multiplier: 2.0,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        let default_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join("vigil")
            .join("baseline.json");

        Self {
            baseline_path: default_path,
            flush_interval: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl MonitoringConfig {
    pub fn sample_interval_duration(&self) -> Duration {
        Duration::from_secs(self.sample_interval)
    }

    pub fn learning_period_duration(&self) -> Duration {
        Duration::from_secs(self.learning_period)
    }
}

impl ResponseConfig {
    pub fn action_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.action_timeout)
    }
}

impl RetryConfig {
    /// Bounded exponential backoff delay before the given retry attempt
    /// (attempt 1 = first retry).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.base_delay as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay as f64))
    }
}

impl PersistenceConfig {
    pub fn flush_interval_duration(&self) -> Duration {
        Duration::from_secs(self.flush_interval)
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.to_string_lossy().to_string(),
        })?;

        let config: AgentConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError { reason: e.to_string() })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to this configuration
    pub fn apply_env(mut self) -> ConfigResult<Self> {
        if let Ok(baseline_path) = std::env::var("VIGIL_BASELINE_PATH") {
            self.persistence.baseline_path = PathBuf::from(baseline_path);
        }

        if let Ok(threshold) = std::env::var("VIGIL_ANOMALY_THRESHOLD") {
            self.monitoring.anomaly_threshold =
                threshold.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "VIGIL_ANOMALY_THRESHOLD".to_string(),
                    value: threshold,
                })?;
        }

        if let Ok(window_size) = std::env::var("VIGIL_WINDOW_SIZE") {
            self.monitoring.window_size =
                window_size.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "VIGIL_WINDOW_SIZE".to_string(),
                    value: window_size,
                })?;
        }

        if let Ok(log_level) = std::env::var("VIGIL_LOG_LEVEL") {
            self.logging.level = log_level;
        }

        Ok(self)
    }

    /// Load configuration with fallback order: file -> env -> defaults
    pub fn load_with_fallback<P: AsRef<Path>>(config_path: Option<P>) -> ConfigResult<Self> {
        let mut config = AgentConfig::default();

        if let Some(path) = config_path {
            if path.as_ref().exists() {
                config = AgentConfig::from_file(path)?;
            }
        }

        config = config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.monitoring.window_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "monitoring.window_size".to_string(),
                value: "0".to_string(),
            });
        }

        if self.monitoring.sample_interval == 0 {
            return Err(ConfigError::InvalidValue {
                field: "monitoring.sample_interval".to_string(),
                value: "0".to_string(),
            });
        }

        if self.monitoring.anomaly_threshold <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "monitoring.anomaly_threshold".to_string(),
                value: self.monitoring.anomaly_threshold.to_string(),
            });
        }

        if self.monitoring.min_samples == 0 {
            return Err(ConfigError::InvalidValue {
                field: "monitoring.min_samples".to_string(),
                value: "0".to_string(),
            });
        }

        if self.monitoring.outlier_clip_sigma <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "monitoring.outlier_clip_sigma".to_string(),
                value: self.monitoring.outlier_clip_sigma.to_string(),
            });
        }

        if self.response.block_tier < self.response.alert_tier {
            return Err(ConfigError::ValidationFailed {
                reason: format!(
                    "response.block_tier ({}) must be >= response.alert_tier ({})",
                    self.response.block_tier, self.response.alert_tier
                ),
            });
        }

        if self.response.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "response.retry.max_attempts".to_string(),
                value: "0".to_string(),
            });
        }

        if self.response.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "response.retry.backoff_multiplier".to_string(),
                value: self.response.retry.backoff_multiplier.to_string(),
            });
        }

        if self.persistence.flush_interval == 0 {
            return Err(ConfigError::InvalidValue {
                field: "persistence.flush_interval".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("vigil").join("agent.toml"))
            .ok_or_else(|| ConfigError::ValidationFailed {
                reason: "Unable to determine config directory".to_string(),
            })
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| ConfigError::ValidationFailed {
                reason: format!("Unable to create config directory: {}", parent.display()),
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationFailed { reason: e.to_string() })?;

        fs::write(path, content).map_err(|_| ConfigError::ValidationFailed {
            reason: format!("Unable to write config file: {}", path.display()),
        })?;

        Ok(())
    }
}
