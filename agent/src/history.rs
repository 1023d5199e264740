//! Fixed-capacity ring of recent samples for a single metric

use std::collections::VecDeque;

use crate::sample::MetricSample;

/// Ordered sequence of the most recent samples for one metric.
///
/// Append-only with FIFO eviction once capacity is reached; length never
/// exceeds the configured window size and order stays chronological.
#[derive(Debug, Clone)]
pub struct MetricHistory {
    capacity: usize,
    samples: VecDeque<MetricSample>,
}

impl MetricHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, sample: MetricSample) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<&MetricSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricSample> {
        self.samples.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.value)
    }
}
