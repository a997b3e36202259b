//! Error injection framework for the simulated link.
//!
//! Decides, per command, whether the simulated device answers normally,
//! answers with a failure, stays silent, or drops the connection. The verdict
//! is expressed as a [`LinkError`] whose kind tells the link what to do:
//!
//! | kind | simulated behavior |
//! |------|--------------------|
//! | `Hardware` | device answers `success: false` |
//! | `Timeout` | command accepted, no response ever emitted |
//! | `Communication` | link drops and emits `Disconnected` |

use super::rng::MockRng;
use lockcycle_core::{LinkError, LinkErrorKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Wildcard operation name matching every command kind.
pub const ANY_OPERATION: &str = "*";

/// Error injection configuration for the simulated link
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Per-operation failure rate (0.0 to 1.0)
    failure_rates: Arc<HashMap<&'static str, f64>>,
    /// Probability that a command is swallowed without a response
    no_response_rate: f64,
    /// Specific failure scenarios
    scenarios: Arc<Vec<ErrorScenario>>,
    /// RNG for failure decisions
    rng: Arc<MockRng>,
    /// State tracking for scenarios
    state: Arc<Mutex<ErrorState>>,
}

/// Scripted failure behavior.
#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Answer with failure after N successful operations
    FailAfterN {
        /// Operation name, or [`ANY_OPERATION`]
        operation: &'static str,
        /// Successful operations before failures start
        count: u32,
    },
    /// Accept the operation but never answer it
    NoResponse {
        /// Operation name, or [`ANY_OPERATION`]
        operation: &'static str,
    },
    /// Drop the link once N commands have been accepted
    CommunicationLoss {
        /// Commands accepted before the link drops
        after: u32,
    },
    /// Device fault: every command from now on is answered with failure
    DeviceFault {
        /// Fault code reported in the failure message
        code: u32,
    },
}

#[derive(Default, Debug)]
struct ErrorState {
    /// Operation counters for FailAfterN scenarios
    operation_counts: HashMap<&'static str, u32>,
    /// Commands seen, for CommunicationLoss
    total_commands: u32,
    /// Whether communication has been lost
    communication_lost: bool,
    /// Device fault code (0 = no fault)
    fault_code: u32,
}

fn matches_operation(pattern: &str, operation: &str) -> bool {
    pattern == ANY_OPERATION || pattern == operation
}

impl ErrorConfig {
    fn build(
        failure_rates: HashMap<&'static str, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            failure_rates: Arc::new(failure_rates),
            no_response_rate: 0.0,
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Create error config with no errors (default)
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Create error config with uniform random failures
    pub fn random_failures(rate: f64) -> Self {
        Self::random_failures_seeded(rate, None)
    }

    /// Create error config with uniform random failures and specific seed
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert(ANY_OPERATION, rate);
        Self::build(rates, Vec::new(), seed)
    }

    /// Create error config with a single scenario
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Create error config with multiple scenarios
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    /// Create error config with custom failure rates per operation
    pub fn with_rates(rates: HashMap<&'static str, f64>) -> Self {
        Self::build(rates, Vec::new(), None)
    }

    /// Additionally swallow commands without a response at the given rate.
    pub fn with_no_response_rate(mut self, rate: f64) -> Self {
        self.no_response_rate = rate;
        self
    }

    /// Check how the device treats an operation.
    ///
    /// `Ok(())` means a normal, successful answer.
    pub fn check_operation(&self, operation: &'static str) -> Result<(), LinkError> {
        let mut state = self.state.lock();
        state.total_commands += 1;

        if state.communication_lost {
            return Err(LinkError::new(
                LinkErrorKind::Communication,
                "Communication lost",
            ));
        }

        if state.fault_code != 0 {
            return Err(LinkError::new(
                LinkErrorKind::Hardware,
                format!("Device fault: {}", state.fault_code),
            ));
        }

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                } if matches_operation(op, operation) => {
                    let current = state.operation_counts.entry(*op).or_insert(0);
                    *current += 1;
                    if *current > *count {
                        return Err(LinkError::new(
                            LinkErrorKind::Hardware,
                            format!("Injected failure after {} operations", count),
                        ));
                    }
                }
                ErrorScenario::NoResponse { operation: op } if matches_operation(op, operation) => {
                    return Err(LinkError::new(
                        LinkErrorKind::Timeout,
                        format!("Operation '{}' never answered", operation),
                    ));
                }
                ErrorScenario::CommunicationLoss { after } => {
                    if state.total_commands > *after {
                        state.communication_lost = true;
                        return Err(LinkError::new(
                            LinkErrorKind::Communication,
                            "Communication lost",
                        ));
                    }
                }
                ErrorScenario::DeviceFault { code } => {
                    state.fault_code = *code;
                    return Err(LinkError::new(
                        LinkErrorKind::Hardware,
                        format!("Device fault: {}", code),
                    ));
                }
                _ => {}
            }
        }

        if self.rng.should_fail(self.no_response_rate) {
            return Err(LinkError::new(
                LinkErrorKind::Timeout,
                format!("Operation '{}' lost", operation),
            ));
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get(ANY_OPERATION))
            .copied()
            .unwrap_or(0.0);

        if self.rng.should_fail(rate) {
            return Err(LinkError::new(
                LinkErrorKind::Hardware,
                format!("Random failure on operation '{}'", operation),
            ));
        }

        Ok(())
    }

    /// Reset error state (clear counters, faults)
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}
