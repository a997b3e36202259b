//! Latency profiles for realistic mode.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::rng::MockRng;

/// Range a simulated response latency is drawn from, uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyProfile {
    /// Fastest response in milliseconds
    pub min_latency_ms: u64,
    /// Slowest response in milliseconds
    pub max_latency_ms: u64,
}

impl LatencyProfile {
    /// Create a profile; the bounds are swapped if given in the wrong order.
    pub fn new(min_latency_ms: u64, max_latency_ms: u64) -> Self {
        Self {
            min_latency_ms: min_latency_ms.min(max_latency_ms),
            max_latency_ms: min_latency_ms.max(max_latency_ms),
        }
    }

    /// Low-energy radio link to a smart lock actuator
    pub fn bluetooth() -> Self {
        Self::new(100, 300)
    }

    /// Fast local link, useful for short integration tests
    pub fn fast() -> Self {
        Self::new(1, 10)
    }

    /// Fixed latency
    pub fn fixed(latency_ms: u64) -> Self {
        Self::new(latency_ms, latency_ms)
    }

    /// Draw one latency sample.
    pub fn sample(&self, rng: &MockRng) -> Duration {
        if self.min_latency_ms == self.max_latency_ms {
            return Duration::from_millis(self.min_latency_ms);
        }
        Duration::from_millis(rng.gen_range(self.min_latency_ms..=self.max_latency_ms))
    }
}

impl Default for LatencyProfile {
    fn default() -> Self {
        Self::bluetooth()
    }
}
