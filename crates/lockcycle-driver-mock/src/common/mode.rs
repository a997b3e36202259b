//! Operational modes for the simulated link.
//!
//! - **Instant**: zero latency, deterministic behavior for unit tests
//! - **Realistic**: radio-like latency for integration tests and demos
//! - **Chaos**: realistic latency plus random device failures

use serde::{Deserialize, Serialize};

/// Operational modes for the simulated link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MockMode {
    /// Zero delays, deterministic - for unit tests
    #[default]
    Instant,
    /// Hardware-like timing - for integration tests
    Realistic,
    /// Random failures on top of realistic timing - for resilience testing
    Chaos,
}

impl MockMode {
    /// Whether responses are delayed by a latency profile.
    pub fn simulates_latency(&self) -> bool {
        !matches!(self, MockMode::Instant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode() {
        assert_eq!(MockMode::default(), MockMode::Instant);
        assert!(!MockMode::Instant.simulates_latency());
        assert!(MockMode::Chaos.simulates_latency());
    }

    #[test]
    fn test_mode_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: MockMode,
        }
        let w: Wrapper = toml::from_str(r#"mode = "realistic""#).unwrap();
        assert_eq!(w.mode, MockMode::Realistic);
    }
}
