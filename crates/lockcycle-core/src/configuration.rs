//! Immutable input of a test run.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::command::CommandKind;
use crate::error::ConfigurationError;

/// Retry behaviour for a failed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Whether failed steps are retried at all
    pub enabled: bool,
    /// Extra attempts after the first one
    pub max_retries: u32,
    /// Pause between attempts
    pub retry_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Total number of attempts a step may make, including the first.
    pub fn max_attempts(&self) -> u32 {
        if self.enabled {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    /// Delay between attempts as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Configuration of one test run.
///
/// Missing fields take their defaults when deserialized, so a TOML table with
/// only `target_cycles = 500` is a complete configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfiguration {
    /// Number of cycles to run before completing
    pub target_cycles: u32,
    /// Pause between consecutive steps of one cycle
    pub inter_command_delay_ms: u64,
    /// Pause between consecutive cycles
    pub inter_cycle_delay_ms: u64,
    /// How long to wait for each response
    pub response_timeout_ms: u64,
    /// Retry policy for failed steps
    pub retry: RetryPolicy,
    /// Commands issued per cycle, in order
    pub cycle: Vec<CommandKind>,
}

impl Default for TestConfiguration {
    fn default() -> Self {
        Self {
            target_cycles: 100,
            inter_command_delay_ms: 1000,
            inter_cycle_delay_ms: 0,
            response_timeout_ms: 5000,
            retry: RetryPolicy::default(),
            cycle: CommandKind::default_cycle(),
        }
    }
}

impl TestConfiguration {
    /// Configuration with the given cycle count and defaults for the rest.
    pub fn with_target_cycles(target_cycles: u32) -> Self {
        Self {
            target_cycles,
            ..Default::default()
        }
    }

    /// Check the invariants required before a run may start.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.target_cycles == 0 {
            return Err(ConfigurationError::ZeroTargetCycles);
        }
        if self.response_timeout_ms == 0 {
            return Err(ConfigurationError::ZeroResponseTimeout);
        }
        if self.cycle.is_empty() {
            return Err(ConfigurationError::EmptyCycle);
        }
        if self.retry.enabled && self.retry.max_retries == 0 {
            return Err(ConfigurationError::ZeroRetries);
        }
        Ok(())
    }

    /// Response timeout as a [`Duration`].
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Inter-step delay as a [`Duration`].
    pub fn inter_command_delay(&self) -> Duration {
        Duration::from_millis(self.inter_command_delay_ms)
    }

    /// Inter-cycle delay as a [`Duration`].
    pub fn inter_cycle_delay(&self) -> Duration {
        Duration::from_millis(self.inter_cycle_delay_ms)
    }
}
