//! Monitoring service: sample ingestion, baseline learning, snapshots
//!
//! The service is the single writer for metric history and baseline
//! state. After every update it assembles a fresh immutable snapshot and
//! swaps it behind a guarded reference, so API readers always observe a
//! complete, consistent pairing of values and baselines and never hold
//! up the sampling loop.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::baseline::{BaselineStats, BaselineStore, WelfordAccumulator};
use crate::config::MonitoringConfig;
use crate::error::StateError;
use crate::history::MetricHistory;
use crate::persist::LoadedBaseline;
use crate::sample::{MetricKind, MetricSample};
use crate::scorer::{self, Anomaly, AnomalySeverity, STDDEV_EPSILON};

/// Most recent anomalies retained in the snapshot
const RECENT_ANOMALY_CAP: usize = 100;

/// Shared health indicators feeding the snapshot `degraded` flag
#[derive(Debug)]
pub struct HealthFlags {
    persist_healthy: AtomicBool,
    dispatch_healthy: AtomicBool,
}

impl Default for HealthFlags {
    fn default() -> Self {
        Self {
            persist_healthy: AtomicBool::new(true),
            dispatch_healthy: AtomicBool::new(true),
        }
    }
}

impl HealthFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_persist_healthy(&self, healthy: bool) {
        self.persist_healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn set_dispatch_healthy(&self, healthy: bool) {
        self.dispatch_healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn degraded(&self) -> bool {
        !self.persist_healthy.load(Ordering::Relaxed)
            || !self.dispatch_healthy.load(Ordering::Relaxed)
    }
}

/// Latest reading for one metric
#[derive(Debug, Clone, Serialize)]
pub struct MetricReading {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Immutable, point-in-time copy of monitoring state
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringSnapshot {
    pub taken_at: DateTime<Utc>,
    pub metrics: HashMap<MetricKind, MetricReading>,
    pub baselines: HashMap<MetricKind, BaselineStats>,
    pub recent_anomalies: Vec<Anomaly>,
    pub quarantined: Vec<String>,
    pub suppressed: Vec<String>,
    /// True while persistence or dispatch is unhealthy; the snapshot
    /// itself remains the last known-good state
    pub degraded: bool,
}

impl MonitoringSnapshot {
    fn empty() -> Self {
        Self {
            taken_at: Utc::now(),
            metrics: HashMap::new(),
            baselines: HashMap::new(),
            recent_anomalies: Vec::new(),
            quarantined: Vec::new(),
            suppressed: Vec::new(),
            degraded: false,
        }
    }

    /// Compact status lines for logs and CLI output
    pub fn status_lines(&self) -> Vec<String> {
        let mut lines = vec![self.taken_at.format("%H:%M:%S").to_string()];

        if self.metrics.is_empty() {
            lines.push("No data available".to_string());
            return lines;
        }

        let read = |kind: &MetricKind| -> Option<f64> {
            self.metrics.get(kind).map(|r| r.value)
        };

        if let (Some(cpu), Some(ram)) = (read(&MetricKind::Cpu), read(&MetricKind::Ram)) {
            lines.push(format!("CPU:{:.1}% RAM:{:.1}%", cpu, ram));
        }
        if let (Some(disk), Some(temp)) =
            (read(&MetricKind::Disk), read(&MetricKind::Temperature))
        {
            lines.push(format!("Disk:{:.1}% Tmp:{:.1}C", disk, temp));
        }
        if let Some(ping) = read(&MetricKind::Ping) {
            lines.push(format!("Ping:{:.1}ms", ping));
        }
        if let Some(fails) = read(&MetricKind::FailedLogins) {
            lines.push(format!("Fails:{:.0}", fails));
        }
        if self.degraded {
            lines.push("DEGRADED".to_string());
        }

        lines
    }
}

/// Cloneable read handle onto the current snapshot
#[derive(Clone)]
pub struct SnapshotHandle {
    inner: Arc<RwLock<Arc<MonitoringSnapshot>>>,
}

impl SnapshotHandle {
    /// The most recently published snapshot; cheap, never blocks on the
    /// sampling loop beyond the pointer swap
    pub fn current(&self) -> Arc<MonitoringSnapshot> {
        self.inner.read().unwrap().clone()
    }
}

/// Owns metric history and baseline state; single writer
pub struct MonitoringService {
    config: MonitoringConfig,
    critical_tier: f64,
    histories: HashMap<MetricKind, MetricHistory>,
    accumulators: HashMap<MetricKind, WelfordAccumulator>,
    baselines: BaselineStore,
    quarantined: HashSet<MetricKind>,
    suppressed: HashSet<String>,
    learning_period: chrono::Duration,
    /// Anchored to the first ingested sample's timestamp
    learning_until: Option<DateTime<Utc>>,
    recent_anomalies: VecDeque<Anomaly>,
    health: Arc<HealthFlags>,
    snapshot: Arc<RwLock<Arc<MonitoringSnapshot>>>,
}

impl MonitoringService {
    pub fn new(
        config: MonitoringConfig,
        critical_tier: f64,
        loaded: LoadedBaseline,
        health: Arc<HealthFlags>,
    ) -> Self {
        let learning_period = chrono::Duration::seconds(config.learning_period as i64);

        let service = Self {
            config,
            critical_tier,
            histories: HashMap::new(),
            accumulators: HashMap::new(),
            baselines: loaded.store,
            quarantined: HashSet::new(),
            suppressed: loaded.suppressed.into_iter().collect(),
            learning_period,
            learning_until: None,
            recent_anomalies: VecDeque::new(),
            health,
            snapshot: Arc::new(RwLock::new(Arc::new(MonitoringSnapshot::empty()))),
        };
        service.publish_snapshot();
        service
    }

    /// Handle for concurrent snapshot readers
    pub fn snapshot_handle(&self) -> SnapshotHandle {
        SnapshotHandle {
            inner: self.snapshot.clone(),
        }
    }

    pub fn baselines(&self) -> &BaselineStore {
        &self.baselines
    }

    /// Feedback keys to persist alongside the baselines
    pub fn suppressed_keys(&self) -> Vec<String> {
        self.suppressed.iter().cloned().collect()
    }

    /// Ingest one sample.
    ///
    /// Unlearned metrics accumulate toward their baseline and never
    /// produce anomalies. Learned metrics are scored; a z-score beyond
    /// the configured threshold yields `Some(Anomaly)`. Errors quarantine
    /// only the affected metric; other metrics keep updating.
    pub fn sample_and_update(
        &mut self,
        sample: MetricSample,
    ) -> Result<Option<Anomaly>, StateError> {
        let kind = sample.kind.clone();

        if !sample.value.is_finite() {
            return Err(StateError::NonFiniteSample {
                metric: kind.as_key(),
                value: sample.value,
            });
        }

        let window_size = self.config.window_size;
        self.histories
            .entry(kind.clone())
            .or_insert_with(|| MetricHistory::new(window_size))
            .push(sample.clone());

        if self.quarantined.contains(&kind) {
            self.publish_snapshot();
            return Ok(None);
        }

        // Unreachable-host marker: flagged regardless of baseline and
        // excluded from accumulation
        if let MetricKind::Host(name) = &kind {
            if sample.value < 0.0 {
                let anomaly = Anomaly {
                    id: Uuid::new_v4(),
                    kind: kind.clone(),
                    observed_value: sample.value,
                    baseline_mean: 0.0,
                    baseline_stddev: 0.0,
                    severity_score: 0.0,
                    severity: AnomalySeverity::Info,
                    detected_at: sample.timestamp,
                    source: Some(name.clone()),
                };
                warn!(host = %name, "Monitored host unreachable");
                self.record_anomaly(anomaly.clone());
                self.publish_snapshot();
                return Ok(Some(anomaly));
            }
        }

        let learned_baseline = self
            .baselines
            .get(&kind)
            .filter(|b| b.is_learned)
            .cloned();

        let result = match learned_baseline {
            Some(baseline) => self.score_learned(&sample, &baseline),
            None => {
                self.accumulate(&kind, sample.value);
                self.maybe_promote(&kind, sample.timestamp).map(|_| None)
            }
        };

        self.publish_snapshot();
        result
    }

    fn score_learned(
        &mut self,
        sample: &MetricSample,
        baseline: &BaselineStats,
    ) -> Result<Option<Anomaly>, StateError> {
        let kind = &sample.kind;

        if !baseline.mean.is_finite() || !baseline.stddev.is_finite() || baseline.stddev < 0.0 {
            self.quarantined.insert(kind.clone());
            error!(metric = %kind, "Baseline invariant violated, quarantining metric");
            return Err(StateError::CorruptBaseline {
                metric: kind.as_key(),
                reason: format!("mean={}, stddev={}", baseline.mean, baseline.stddev),
            });
        }

        let anomaly = scorer::evaluate(
            sample,
            baseline,
            self.config.anomaly_threshold,
            self.critical_tier,
            sample.timestamp,
        );

        match anomaly {
            Some(anomaly) => {
                if self.is_suppressed(&anomaly) {
                    debug!(metric = %kind, value = sample.value, "Anomaly suppressed by feedback");
                    return Ok(None);
                }

                warn!(
                    metric = %kind,
                    value = sample.value,
                    mean = baseline.mean,
                    stddev = baseline.stddev,
                    score = anomaly.severity_score,
                    severity = %anomaly.severity,
                    "Anomaly detected"
                );
                self.record_anomaly(anomaly.clone());
                Ok(Some(anomaly))
            }
            None => Ok(None),
        }
    }

    /// Feed the learning accumulator, excluding gross outliers once a
    /// warm-up of samples has established a running spread.
    fn accumulate(&mut self, kind: &MetricKind, value: f64) {
        let acc = self.accumulators.entry(kind.clone()).or_default();

        if acc.count() >= self.config.outlier_warmup {
            let spread = acc.stddev().max(STDDEV_EPSILON);
            if (value - acc.mean()).abs() > self.config.outlier_clip_sigma * spread {
                debug!(metric = %kind, value, "Excluding outlier from baseline learning");
                return;
            }
        }

        acc.push(value);
    }

    /// Promote an accumulator to a learned baseline once the learning
    /// period has elapsed and enough samples have accumulated.
    fn maybe_promote(&mut self, kind: &MetricKind, now: DateTime<Utc>) -> Result<(), StateError> {
        // Samples age against their own timestamps, never the wall clock
        let deadline = match self.learning_until {
            Some(deadline) => deadline,
            None => {
                let deadline = now + self.learning_period;
                self.learning_until = Some(deadline);
                deadline
            }
        };

        let acc = match self.accumulators.get(kind) {
            Some(acc) => acc,
            None => return Ok(()),
        };

        if now < deadline || acc.count() < self.config.min_samples {
            return Ok(());
        }

        match BaselineStats::from_accumulator(kind, acc, now) {
            Ok(stats) => {
                info!(
                    metric = %kind,
                    mean = stats.mean,
                    stddev = stats.stddev,
                    samples = stats.sample_count,
                    "Baseline learned"
                );
                self.baselines.insert(kind.clone(), stats);
                Ok(())
            }
            Err(e) => {
                self.quarantined.insert(kind.clone());
                error!(metric = %kind, error = %e, "Baseline promotion failed, quarantining metric");
                Err(e)
            }
        }
    }

    /// Reset all baselines to unlearned and restart the learning window
    pub fn begin_learning_period(&mut self, duration: Duration) {
        info!(seconds = duration.as_secs(), "Beginning new learning period");
        self.baselines.clear();
        self.accumulators.clear();
        self.learning_period = chrono::Duration::seconds(duration.as_secs() as i64);
        self.learning_until = None;
        self.publish_snapshot();
    }

    /// Record operator feedback: future anomalies for this (metric,
    /// rounded value) pair are suppressed.
    pub fn mark_false_positive(&mut self, kind: &MetricKind, value: f64) {
        let key = feedback_key(kind, value);
        info!(key = %key, "Marking anomaly as false positive");
        self.suppressed.insert(key);
        self.publish_snapshot();
    }

    /// Lift a quarantine placed after an invariant violation; the metric
    /// starts over unlearned.
    pub fn reset_quarantine(&mut self, kind: &MetricKind) {
        if self.quarantined.remove(kind) {
            info!(metric = %kind, "Quarantine reset, metric will relearn");
            self.baselines.remove(kind);
            self.accumulators.remove(kind);
            self.publish_snapshot();
        }
    }

    fn is_suppressed(&self, anomaly: &Anomaly) -> bool {
        self.suppressed
            .contains(&feedback_key(&anomaly.kind, anomaly.observed_value))
    }

    fn record_anomaly(&mut self, anomaly: Anomaly) {
        if self.recent_anomalies.len() >= RECENT_ANOMALY_CAP {
            self.recent_anomalies.pop_front();
        }
        self.recent_anomalies.push_back(anomaly);
    }

    /// Assemble and swap in a fresh snapshot. Readers holding the old
    /// Arc keep a consistent view; new readers get this one.
    fn publish_snapshot(&self) {
        let snapshot = MonitoringSnapshot {
            taken_at: Utc::now(),
            metrics: self
                .histories
                .iter()
                .filter_map(|(kind, history)| {
                    history.latest().map(|sample| {
                        (
                            kind.clone(),
                            MetricReading {
                                value: sample.value,
                                timestamp: sample.timestamp,
                            },
                        )
                    })
                })
                .collect(),
            baselines: self.baselines.as_map().clone(),
            recent_anomalies: self.recent_anomalies.iter().cloned().collect(),
            quarantined: self.quarantined.iter().map(|k| k.as_key()).collect(),
            suppressed: self.suppressed.iter().cloned().collect(),
            degraded: self.health.degraded(),
        };

        *self.snapshot.write().unwrap() = Arc::new(snapshot);
    }
}

fn feedback_key(kind: &MetricKind, value: f64) -> String {
    format!("{}:{:.0}", kind.as_key(), value)
}
