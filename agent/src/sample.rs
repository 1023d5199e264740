//! Metric kinds and point-in-time samples
//!
//! Metric values are a closed enumeration with a fixed numeric
//! representation; unknown keys loaded from older files map onto
//! per-host metrics, which were stored under bare host names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of metrics the agent understands
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MetricKind {
    /// Global CPU usage in percent
    Cpu,
    /// Memory usage in percent
    Ram,
    /// Disk usage in percent, summed over mounted disks
    Disk,
    /// Temperature in degrees Celsius
    Temperature,
    /// Gateway ping latency in milliseconds
    Ping,
    /// Number of active network connections
    NetConnections,
    /// Failed login attempts seen in the last sampling window
    FailedLogins,
    /// Ping latency in milliseconds for a monitored remote host
    Host(String),
}

impl MetricKind {
    /// Stable string key used for persisted documents and log fields
    pub fn as_key(&self) -> String {
        match self {
            MetricKind::Cpu => "cpu".to_string(),
            MetricKind::Ram => "ram".to_string(),
            MetricKind::Disk => "disk".to_string(),
            MetricKind::Temperature => "temp".to_string(),
            MetricKind::Ping => "ping".to_string(),
            MetricKind::NetConnections => "net".to_string(),
            MetricKind::FailedLogins => "fail".to_string(),
            MetricKind::Host(name) => format!("host:{}", name),
        }
    }

    /// Human-readable label for alerts and status output
    pub fn label(&self) -> String {
        match self {
            MetricKind::Cpu => "CPU".to_string(),
            MetricKind::Ram => "RAM".to_string(),
            MetricKind::Disk => "Disk".to_string(),
            MetricKind::Temperature => "Temp".to_string(),
            MetricKind::Ping => "Ping".to_string(),
            MetricKind::NetConnections => "Connections".to_string(),
            MetricKind::FailedLogins => "Failed Logins".to_string(),
            MetricKind::Host(name) => name.clone(),
        }
    }
}

impl From<String> for MetricKind {
    fn from(key: String) -> Self {
        match key.as_str() {
            "cpu" => MetricKind::Cpu,
            "ram" => MetricKind::Ram,
            "disk" => MetricKind::Disk,
            "temp" => MetricKind::Temperature,
            "ping" => MetricKind::Ping,
            "net" => MetricKind::NetConnections,
            "fail" => MetricKind::FailedLogins,
            other => match other.strip_prefix("host:") {
                Some(name) => MetricKind::Host(name.to_string()),
                // Older baseline files keyed monitored hosts by bare name
                None => MetricKind::Host(other.to_string()),
            },
        }
    }
}

impl From<MetricKind> for String {
    fn from(kind: MetricKind) -> Self {
        kind.as_key()
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_key())
    }
}

/// A single point-in-time reading; immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub kind: MetricKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(kind: MetricKind, value: f64) -> Self {
        Self::at(kind, value, Utc::now())
    }

    pub fn at(kind: MetricKind, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self { kind, value, timestamp }
    }
}
