//! Rolling latency estimation and classification.
//!
//! Each connection keeps the last N round-trip samples in insertion
//! order. The derived figures are the rounded mean and the rounded
//! population standard deviation (jitter). Classification only happens
//! once the window is full -- a connection is never warned or kicked on
//! partial evidence.

use std::collections::VecDeque;

use cadence_types::LatencyStatus;

/// Thresholds against which a full sample window is classified.
#[derive(Debug, Clone, Copy)]
pub struct LatencyThresholds {
    /// Hard bound on average latency; above this the connection is kicked.
    pub max_latency_ms: u64,
    /// Hard bound on jitter; above this the connection is kicked.
    pub max_jitter_ms: u64,
    /// Soft bound on average latency; above this the client is warned.
    pub warning_latency_ms: u64,
    /// Soft bound on jitter; above this the client is warned.
    pub warning_jitter_ms: u64,
    /// Number of samples required before any classification.
    pub sample_count: usize,
}

/// A classified snapshot of a full sample window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySummary {
    /// Rounded mean of the window (ms).
    pub avg_latency_ms: u64,
    /// Rounded population standard deviation of the window (ms).
    pub jitter_ms: u64,
    /// Threshold classification.
    pub status: LatencyStatus,
}

impl LatencySummary {
    /// Human-readable description of which hard bound was breached.
    ///
    /// Only meaningful when `status` is [`LatencyStatus::Critical`].
    pub fn breach_reason(&self, thresholds: &LatencyThresholds) -> String {
        if self.avg_latency_ms > thresholds.max_latency_ms {
            format!(
                "average latency {}ms exceeds {}ms",
                self.avg_latency_ms, thresholds.max_latency_ms
            )
        } else {
            format!(
                "jitter {}ms exceeds {}ms",
                self.jitter_ms, thresholds.max_jitter_ms
            )
        }
    }
}

/// Ring buffer of the most recent round-trip samples for one connection.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<u64>,
    capacity: usize,
}

impl LatencyWindow {
    /// Create an empty window holding up to `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record a sample, evicting the oldest if the window is full.
    pub fn record(&mut self, rtt_ms: u64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt_ms);
    }

    /// Whether enough samples have accumulated to classify.
    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    /// The samples in insertion order, oldest first.
    pub fn samples(&self) -> Vec<u64> {
        self.samples.iter().copied().collect()
    }

    /// Rounded mean of the window. Zero when empty.
    pub fn avg_ms(&self) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        self.mean().round() as u64
    }

    /// Rounded population standard deviation. Zero when empty.
    pub fn jitter_ms(&self) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        let mean = self.mean();
        let variance = self
            .samples
            .iter()
            .map(|&s| {
                let d = s as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / self.samples.len() as f64;
        variance.sqrt().round() as u64
    }

    /// Classify the window against `thresholds`.
    ///
    /// Returns `None` until the window is full.
    pub fn classify(&self, thresholds: &LatencyThresholds) -> Option<LatencySummary> {
        if self.samples.len() < thresholds.sample_count {
            return None;
        }

        let avg_latency_ms = self.avg_ms();
        let jitter_ms = self.jitter_ms();

        let status = if avg_latency_ms > thresholds.max_latency_ms
            || jitter_ms > thresholds.max_jitter_ms
        {
            LatencyStatus::Critical
        } else if avg_latency_ms > thresholds.warning_latency_ms
            || jitter_ms > thresholds.warning_jitter_ms
        {
            LatencyStatus::Warning
        } else {
            LatencyStatus::Ok
        };

        Some(LatencySummary {
            avg_latency_ms,
            jitter_ms,
            status,
        })
    }

    fn mean(&self) -> f64 {
        self.samples.iter().sum::<u64>() as f64 / self.samples.len() as f64
    }
}
