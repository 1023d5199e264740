//! Crash-safe persistence of learned baselines
//!
//! Baselines are written as a versioned JSON document through a
//! write-to-temp-then-atomic-rename sequence, guarded by a lock so a
//! periodic flush and a manual save cannot interleave. Loading is
//! infallible by design: a missing or corrupt file yields a fresh,
//! unlearned store and the agent relearns.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::baseline::{BaselineStats, BaselineStore};
use crate::error::{PersistError, PersistResult};
use crate::sample::MetricKind;

/// Current schema version of the baseline document
pub const BASELINE_SCHEMA_VERSION: u32 = 2;

fn current_version() -> u32 {
    BASELINE_SCHEMA_VERSION
}

/// Persisted baseline document.
///
/// Version 1 files (written before the document carried a version field)
/// used the keys `baseline` and `feedback` and records without learned
/// flags; serde aliases and defaults let them load without migration.
#[derive(Debug, Serialize, Deserialize)]
pub struct BaselineDocument {
    #[serde(default = "current_version")]
    pub version: u32,

    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,

    #[serde(default, alias = "baseline")]
    pub baselines: HashMap<String, BaselineRecord>,

    /// Suppressed (metric, rounded value) feedback keys
    #[serde(default)]
    pub suppressed: Vec<String>,

    /// Version 1 feedback map; merged into `suppressed` on load
    #[serde(default, skip_serializing)]
    pub feedback: HashMap<String, bool>,
}

/// One persisted baseline entry
#[derive(Debug, Serialize, Deserialize)]
pub struct BaselineRecord {
    pub mean: f64,

    #[serde(alias = "std")]
    pub stddev: f64,

    #[serde(default)]
    pub sample_count: u64,

    #[serde(default)]
    pub learned_at: Option<DateTime<Utc>>,

    /// Absent in version 1 files; defaulted from sample_count on load
    #[serde(default)]
    pub is_learned: Option<bool>,
}

/// Result of loading the baseline file
#[derive(Debug, Default)]
pub struct LoadedBaseline {
    pub store: BaselineStore,
    pub suppressed: Vec<String>,
}

/// Crash-safe read/write of the baseline store
pub struct PersistenceGateway {
    path: PathBuf,
    min_samples: u64,
    write_lock: Mutex<()>,
}

impl PersistenceGateway {
    pub fn new<P: AsRef<Path>>(path: P, min_samples: u64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            min_samples,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the baseline store atomically.
    ///
    /// The document is written to `<path>.tmp` and renamed over the
    /// canonical file, so a crash mid-write never leaves a truncated
    /// canonical file. Concurrent saves serialize on the write lock.
    pub async fn save(&self, store: &BaselineStore, suppressed: &[String]) -> PersistResult<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PersistError::DirectoryCreationFailed {
                    path: parent.to_string_lossy().to_string(),
                    reason: e.to_string(),
                })?;
        }

        let document = BaselineDocument {
            version: BASELINE_SCHEMA_VERSION,
            saved_at: Some(Utc::now()),
            baselines: store
                .iter()
                .map(|(kind, stats)| {
                    (
                        kind.as_key(),
                        BaselineRecord {
                            mean: stats.mean,
                            stddev: stats.stddev,
                            sample_count: stats.sample_count,
                            learned_at: stats.learned_at,
                            is_learned: Some(stats.is_learned),
                        },
                    )
                })
                .collect(),
            suppressed: suppressed.to_vec(),
            feedback: HashMap::new(),
        };

        let content = serde_json::to_string_pretty(&document)
            .map_err(|e| PersistError::SerializationFailed { reason: e.to_string() })?;

        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, content)
            .await
            .map_err(|e| PersistError::WriteFailed {
                path: temp_path.to_string_lossy().to_string(),
                reason: e.to_string(),
            })?;

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| PersistError::RenameFailed {
                path: self.path.to_string_lossy().to_string(),
                reason: e.to_string(),
            })?;

        Ok(())
    }

    /// Load the baseline store.
    ///
    /// Missing and corrupt files both yield a fresh, unlearned store; a
    /// corrupt file is left in place for inspection and gets replaced by
    /// the next successful save.
    pub async fn load(&self) -> LoadedBaseline {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No baseline file, starting unlearned");
                return LoadedBaseline::default();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read baseline file, starting unlearned");
                return LoadedBaseline::default();
            }
        };

        let document: BaselineDocument = match serde_json::from_str(&content) {
            Ok(document) => document,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Baseline file is corrupt, starting unlearned");
                return LoadedBaseline::default();
            }
        };

        let mut store = BaselineStore::new();
        for (key, record) in document.baselines {
            let kind = MetricKind::from(key);
            let is_learned = record
                .is_learned
                .unwrap_or(record.sample_count >= self.min_samples);

            // A record violating the stddev invariant is dropped rather
            // than loaded into anomaly decisions
            if !record.mean.is_finite() || !record.stddev.is_finite() || record.stddev < 0.0 {
                warn!(metric = %kind, "Dropping corrupt baseline record");
                continue;
            }

            store.insert(
                kind,
                BaselineStats {
                    mean: record.mean,
                    stddev: record.stddev,
                    sample_count: record.sample_count,
                    learned_at: record.learned_at,
                    is_learned,
                },
            );
        }

        let mut suppressed = document.suppressed;
        suppressed.extend(
            document
                .feedback
                .into_iter()
                .filter(|(_, flagged)| *flagged)
                .map(|(key, _)| translate_legacy_feedback_key(&key)),
        );

        info!(
            path = %self.path.display(),
            version = document.version,
            baselines = store.len(),
            "Loaded baseline file"
        );

        LoadedBaseline { store, suppressed }
    }
}

/// Canonicalize a version 1 feedback key.
///
/// Version 1 files wrote feedback keys as `{metric}-{value}` over legacy
/// metric names (bare host names included); current keys are
/// `{canonical metric key}:{value}`. Keys that do not match the legacy
/// shape pass through unchanged.
fn translate_legacy_feedback_key(key: &str) -> String {
    match key.rsplit_once('-') {
        Some((metric, value)) if !metric.is_empty() && value.parse::<f64>().is_ok() => {
            format!("{}:{}", MetricKind::from(metric.to_string()).as_key(), value)
        }
        _ => key.to_string(),
    }
}
