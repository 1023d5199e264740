//! Pure anomaly scoring
//!
//! Scoring is a deterministic function of a sample and its baseline, with
//! no clock or I/O access, so it can be unit tested in isolation. The
//! severity score is the absolute z-score; an epsilon floor on the
//! stddev keeps constant signals from dividing by zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::baseline::BaselineStats;
use crate::sample::{MetricKind, MetricSample};

/// Floor applied to stddev before dividing, so constant signals score finitely
pub const STDDEV_EPSILON: f64 = 1e-6;

/// Severity tiers derived from the anomaly score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnomalySeverity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for AnomalySeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalySeverity::Info => write!(f, "Info"),
            AnomalySeverity::Warning => write!(f, "Warning"),
            AnomalySeverity::Critical => write!(f, "Critical"),
        }
    }
}

/// A sample that deviated from its learned baseline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: Uuid,
    pub kind: MetricKind,
    pub observed_value: f64,
    pub baseline_mean: f64,
    pub baseline_stddev: f64,
    pub severity_score: f64,
    pub severity: AnomalySeverity,
    pub detected_at: DateTime<Utc>,
    /// Offending address or host, when one is attributable
    pub source: Option<String>,
}

impl Anomaly {
    pub fn describe(&self) -> String {
        format!(
            "Anomaly: {} {:.1} (normal: {:.1}±{:.1}, score {:.1})",
            self.kind.label(),
            self.observed_value,
            self.baseline_mean,
            self.baseline_stddev,
            self.severity_score,
        )
    }
}

/// Absolute z-score of a value against a baseline
pub fn score(value: f64, baseline: &BaselineStats) -> f64 {
    ((value - baseline.mean) / baseline.stddev.max(STDDEV_EPSILON)).abs()
}

/// Map a score onto a severity tier
pub fn severity_for_score(score: f64, critical_tier: f64) -> AnomalySeverity {
    if score >= critical_tier {
        AnomalySeverity::Critical
    } else {
        AnomalySeverity::Warning
    }
}

/// Evaluate a sample against a learned baseline.
///
/// Returns `None` for in-range samples or unlearned baselines. The caller
/// supplies `detected_at` so the function stays clock-free.
pub fn evaluate(
    sample: &MetricSample,
    baseline: &BaselineStats,
    threshold: f64,
    critical_tier: f64,
    detected_at: DateTime<Utc>,
) -> Option<Anomaly> {
    if !baseline.is_learned {
        return None;
    }

    let severity_score = score(sample.value, baseline);
    if severity_score <= threshold {
        return None;
    }

    let source = match &sample.kind {
        MetricKind::Host(name) => Some(name.clone()),
        _ => None,
    };

    Some(Anomaly {
        id: Uuid::new_v4(),
        kind: sample.kind.clone(),
        observed_value: sample.value,
        baseline_mean: baseline.mean,
        baseline_stddev: baseline.stddev,
        severity_score,
        severity: severity_for_score(severity_score, critical_tier),
        detected_at,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn learned(mean: f64, stddev: f64) -> BaselineStats {
        BaselineStats {
            mean,
            stddev,
            sample_count: 60,
            learned_at: Some(Utc::now()),
            is_learned: true,
        }
    }

    #[test]
    fn test_score_is_absolute_z_score() {
        let baseline = learned(50.0, 10.0);
        assert!((score(80.0, &baseline) - 3.0).abs() < 1e-12);
        assert!((score(20.0, &baseline) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_signal_scores_finite() {
        let baseline = learned(10.0, 0.0);
        let s = score(100.0, &baseline);
        assert!(s.is_finite());
        assert!(s > 0.0);
    }

    #[test]
    fn test_unlearned_baseline_never_flags() {
        let sample = MetricSample::new(MetricKind::Cpu, 1000.0);
        let baseline = BaselineStats::unlearned();
        assert!(evaluate(&sample, &baseline, 3.0, 5.0, Utc::now()).is_none());
    }

    #[test]
    fn test_in_range_sample_passes() {
        let sample = MetricSample::new(MetricKind::Cpu, 55.0);
        let baseline = learned(50.0, 10.0);
        assert!(evaluate(&sample, &baseline, 3.0, 5.0, Utc::now()).is_none());
    }

    #[test]
    fn test_deviation_produces_anomaly_with_tiered_severity() {
        let baseline = learned(50.0, 10.0);

        let warning = evaluate(
            &MetricSample::new(MetricKind::Cpu, 90.0),
            &baseline,
            3.0,
            5.0,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(warning.severity, AnomalySeverity::Warning);
        assert!((warning.severity_score - 4.0).abs() < 1e-12);

        let critical = evaluate(
            &MetricSample::new(MetricKind::Cpu, 150.0),
            &baseline,
            3.0,
            5.0,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(critical.severity, AnomalySeverity::Critical);
    }

    #[test]
    fn test_host_anomaly_carries_source() {
        let baseline = learned(20.0, 1.0);
        let sample = MetricSample::new(MetricKind::Host("8.8.8.8".to_string()), 500.0);
        let anomaly = evaluate(&sample, &baseline, 3.0, 5.0, Utc::now()).unwrap();
        assert_eq!(anomaly.source.as_deref(), Some("8.8.8.8"));
    }

    #[test]
    fn test_determinism() {
        let baseline = learned(50.0, 10.0);
        let a = score(87.3, &baseline);
        let b = score(87.3, &baseline);
        assert_eq!(a, b);
    }

    proptest! {
        #[test]
        fn prop_score_finite_and_monotonic(
            mean in -1e6f64..1e6,
            stddev in 0.0f64..1e6,
            value in -1e6f64..1e6,
        ) {
            let baseline = learned(mean, stddev);
            let s = score(value, &baseline);
            prop_assert!(s.is_finite());
            prop_assert!(s >= 0.0);

            // Moving further from the mean never lowers the score
            let further = if value >= mean { value + 1.0 } else { value - 1.0 };
            prop_assert!(score(further, &baseline) >= s);
        }
    }
}
