//! Error handling for the Vigil monitoring agent
//!
//! This module provides the error types for all agent operations,
//! including input validation, baseline persistence, automated response
//! actions, and internal state invariants.

use std::io;

use thiserror::Error;

/// The main error type for the monitoring agent
#[derive(Error, Debug)]
pub enum AgentError {
    /// Malformed external input (addresses, hostnames, sample values)
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Baseline persistence errors
    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    /// Automated response action errors
    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    /// Internal invariant violations
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Generic(String),
}

/// Malformed external input; the offending action is rejected, never coerced
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid IPv4 address: {input:?}")]
    InvalidAddress { input: String },

    #[error("Invalid hostname: {input:?}")]
    InvalidHostname { input: String },

    #[error("Empty input for {field}")]
    EmptyInput { field: String },

    #[error("Non-finite sample value for metric {metric}")]
    NonFiniteValue { metric: String },
}

/// Baseline persistence errors; recoverable by relearning, never fatal
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Failed to create baseline directory {path}: {reason}")]
    DirectoryCreationFailed { path: String, reason: String },

    #[error("Failed to write baseline file {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("Failed to replace baseline file {path}: {reason}")]
    RenameFailed { path: String, reason: String },

    #[error("Failed to read baseline file {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("Baseline file {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Baseline serialization failed: {reason}")]
    SerializationFailed { reason: String },
}

/// External action errors; retried per policy, then reported
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Action timed out after {seconds}s")]
    TimedOut { seconds: u64 },

    #[error("Action target unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Action rejected: {reason}")]
    Rejected { reason: String },

    #[error("Action failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// Invariant violations; treated as programming defects and quarantined
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Non-finite sample for metric {metric}: {value}")]
    NonFiniteSample { metric: String, value: f64 },

    #[error("Baseline for metric {metric} is corrupt: {reason}")]
    CorruptBaseline { metric: String, reason: String },

    #[error("Metric {metric} is quarantined pending manual reset")]
    Quarantined { metric: String },
}

/// Configuration related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Configuration parsing error: {reason}")]
    ParseError { reason: String },

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AgentError>;

/// A specialized result type for validation operations
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

/// A specialized result type for persistence operations
pub type PersistResult<T> = std::result::Result<T, PersistError>;

/// A specialized result type for action operations
pub type ActionResult<T> = std::result::Result<T, ActionError>;

/// A specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl AgentError {
    /// Check if this error is recoverable without operator intervention
    pub fn is_recoverable(&self) -> bool {
        match self {
            AgentError::Validation(_) => true,
            AgentError::Persist(_) => true,
            AgentError::Action(ActionError::Exhausted { .. }) => false,
            AgentError::Action(_) => true,
            AgentError::State(_) => false,
            AgentError::Config(_) => false,
            AgentError::Io(io_error) => {
                matches!(io_error.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock)
            }
            _ => true,
        }
    }

    /// Get the error category for logging and reporting
    pub fn category(&self) -> &'static str {
        match self {
            AgentError::Validation(_) => "validation",
            AgentError::Persist(_) => "persistence",
            AgentError::Action(_) => "action",
            AgentError::State(_) => "state",
            AgentError::Config(_) => "config",
            AgentError::Io(_) => "io",
            AgentError::Serialization(_) => "serialization",
            AgentError::Generic(_) => "generic",
        }
    }
}

impl From<String> for AgentError {
    fn from(msg: String) -> Self {
        AgentError::Generic(msg)
    }
}

impl From<&str> for AgentError {
    fn from(msg: &str) -> Self {
        AgentError::Generic(msg.to_string())
    }
}
