//! Learned statistical baselines
//!
//! Baselines accumulate through Welford's online mean/variance algorithm
//! so the learning phase runs in constant memory and never stores the
//! full sample stream. Variance is the population variance, matching the
//! statistics the agent originally learned from its history window.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::sample::MetricKind;

/// Online mean/variance accumulator (Welford's method)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WelfordAccumulator {
    count: u64,
    mean: f64,
    m2: f64,
}

impl WelfordAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            // m2 is non-negative up to floating point error
            (self.m2 / self.count as f64).max(0.0)
        }
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Derived statistics for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineStats {
    pub mean: f64,
    pub stddev: f64,
    pub sample_count: u64,
    pub learned_at: Option<DateTime<Utc>>,
    pub is_learned: bool,
}

impl BaselineStats {
    /// Promote an accumulator into a learned baseline.
    ///
    /// Fails with a `StateError` when the accumulated statistics violate
    /// the baseline invariants (non-finite mean, negative or non-finite
    /// stddev), so a corrupted metric can be quarantined instead of
    /// silently feeding anomaly decisions.
    pub fn from_accumulator(
        kind: &MetricKind,
        acc: &WelfordAccumulator,
        learned_at: DateTime<Utc>,
    ) -> Result<Self, StateError> {
        let mean = acc.mean();
        let stddev = acc.stddev();

        if !mean.is_finite() || !stddev.is_finite() || stddev < 0.0 {
            return Err(StateError::CorruptBaseline {
                metric: kind.as_key(),
                reason: format!("mean={}, stddev={}", mean, stddev),
            });
        }

        Ok(Self {
            mean,
            stddev,
            sample_count: acc.count(),
            learned_at: Some(learned_at),
            is_learned: true,
        })
    }

    /// An empty, unlearned baseline
    pub fn unlearned() -> Self {
        Self {
            mean: 0.0,
            stddev: 0.0,
            sample_count: 0,
            learned_at: None,
            is_learned: false,
        }
    }

    /// Floating-point tolerant equality, for round-trip checks
    pub fn approx_eq(&self, other: &BaselineStats, tolerance: f64) -> bool {
        (self.mean - other.mean).abs() <= tolerance
            && (self.stddev - other.stddev).abs() <= tolerance
            && self.sample_count == other.sample_count
            && self.is_learned == other.is_learned
    }
}

/// All learned baselines, keyed by metric kind
#[derive(Debug, Clone, Default)]
pub struct BaselineStore {
    baselines: HashMap<MetricKind, BaselineStats>,
}

impl BaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(baselines: HashMap<MetricKind, BaselineStats>) -> Self {
        Self { baselines }
    }

    pub fn get(&self, kind: &MetricKind) -> Option<&BaselineStats> {
        self.baselines.get(kind)
    }

    pub fn insert(&mut self, kind: MetricKind, stats: BaselineStats) {
        self.baselines.insert(kind, stats);
    }

    pub fn remove(&mut self, kind: &MetricKind) -> Option<BaselineStats> {
        self.baselines.remove(kind)
    }

    pub fn clear(&mut self) {
        self.baselines.clear();
    }

    pub fn len(&self) -> usize {
        self.baselines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baselines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MetricKind, &BaselineStats)> {
        self.baselines.iter()
    }

    pub fn as_map(&self) -> &HashMap<MetricKind, BaselineStats> {
        &self.baselines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_welford_constant_signal() {
        let mut acc = WelfordAccumulator::new();
        for _ in 0..10 {
            acc.push(10.0);
        }

        assert_eq!(acc.count(), 10);
        assert!((acc.mean() - 10.0).abs() < 1e-12);
        assert!(acc.stddev() < 1e-12);
    }

    #[test]
    fn test_welford_known_values() {
        let mut acc = WelfordAccumulator::new();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            acc.push(v);
        }

        assert!((acc.mean() - 5.0).abs() < 1e-12);
        // Population stddev of the classic example set is exactly 2
        assert!((acc.stddev() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_promotion_sets_learned() {
        let mut acc = WelfordAccumulator::new();
        for v in [1.0, 2.0, 3.0] {
            acc.push(v);
        }

        let stats =
            BaselineStats::from_accumulator(&MetricKind::Cpu, &acc, Utc::now()).unwrap();
        assert!(stats.is_learned);
        assert_eq!(stats.sample_count, 3);
        assert!(stats.stddev >= 0.0);
        assert!(stats.learned_at.is_some());
    }

    #[test]
    fn test_promotion_rejects_non_finite() {
        let mut acc = WelfordAccumulator::new();
        acc.push(f64::MAX);
        acc.push(-f64::MAX);

        let result = BaselineStats::from_accumulator(&MetricKind::Cpu, &acc, Utc::now());
        assert!(result.is_err());
    }

    proptest! {
        #[test]
        fn prop_welford_matches_two_pass(
            values in proptest::collection::vec(-1e6f64..1e6, 1..128),
        ) {
            let mut acc = WelfordAccumulator::new();
            for v in &values {
                acc.push(*v);
            }

            let n = values.len() as f64;
            let mean: f64 = values.iter().sum::<f64>() / n;
            let variance: f64 =
                values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

            prop_assert!((acc.mean() - mean).abs() < 1e-6);
            prop_assert!((acc.variance() - variance).abs() < 1e-3);
            prop_assert!(acc.stddev() >= 0.0);
        }
    }
}
