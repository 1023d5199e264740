//! Vigil agent library
//!
//! This library provides the core functionality of the Vigil monitoring
//! agent: self-learning statistical baselines over host metrics, anomaly
//! scoring against those baselines, crash-safe baseline persistence, and
//! an automated response dispatcher behind strict input validation.

pub mod baseline;
pub mod config;
pub mod error;
pub mod history;
pub mod monitor;
pub mod persist;
pub mod sample;
pub mod sampler;
pub mod scorer;

// Response path
pub mod dispatch;
pub mod service;
pub mod validate;

// Re-export commonly used types
pub use baseline::{BaselineStats, BaselineStore, WelfordAccumulator};
pub use config::AgentConfig;
pub use dispatch::{
    AlertSink, DispatchRecord, DispatchState, FirewallController, ResponseAction,
    ResponseDispatcher, ShutdownController,
};
pub use error::{AgentError, Result};
pub use monitor::{HealthFlags, MonitoringService, MonitoringSnapshot, SnapshotHandle};
pub use persist::PersistenceGateway;
pub use sample::{MetricKind, MetricSample};
pub use sampler::{Sampler, SystemSampler};
pub use scorer::{Anomaly, AnomalySeverity};
pub use service::{AgentService, SignalShutdown};
pub use validate::ValidatedAddress;
