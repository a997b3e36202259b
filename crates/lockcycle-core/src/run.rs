//! Test run data model.
//!
//! A [`TestRun`] is the mutable root entity of one execution. It is owned by
//! the test runner for its lifetime and handed to observers as cloned
//! snapshots. [`CycleResult`]s are append-only: once pushed into
//! [`TestRun::results`] they are never modified.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::command::CommandKind;
use crate::configuration::TestConfiguration;
use crate::error::StepError;

/// Length of the random suffix of a run id.
const RUN_ID_SUFFIX_LEN: usize = 9;

/// Generate a run id: unix milliseconds plus a random lowercase suffix.
pub fn new_run_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RUN_ID_SUFFIX_LEN)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("{}-{}", Utc::now().timestamp_millis(), suffix)
}

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// Cycles are being executed
    Running,
    /// Execution suspended between cycles
    Paused,
    /// Ended early by an operator stop or a disconnect
    Stopped,
    /// Reached the target cycle count
    Completed,
}

impl TestStatus {
    /// `Stopped` and `Completed` are terminal; nothing leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TestStatus::Stopped | TestStatus::Completed)
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestStatus::Running => write!(f, "running"),
            TestStatus::Paused => write!(f, "paused"),
            TestStatus::Stopped => write!(f, "stopped"),
            TestStatus::Completed => write!(f, "completed"),
        }
    }
}

/// How the final attempt of a step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The device executed the command
    Succeeded,
    /// The device answered with a failure
    Failed,
    /// No response within the timeout
    TimedOut,
    /// The link dropped while the command was outstanding
    Disconnected,
    /// The link refused the command before it was sent
    NotSent,
}

impl StepStatus {
    /// Status of a sent command that resolved with `error`.
    pub fn from_error(error: Option<&StepError>) -> Self {
        match error {
            None => StepStatus::Succeeded,
            Some(StepError::Timeout) => StepStatus::TimedOut,
            Some(StepError::Disconnected) => StepStatus::Disconnected,
            Some(StepError::DeviceFailure(_)) => StepStatus::Failed,
        }
    }

    /// Whether the command reached the link, so its response time is meaningful.
    pub fn was_sent(&self) -> bool {
        !matches!(self, StepStatus::NotSent)
    }
}

/// Outcome of one command/response exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    /// Command issued
    pub kind: CommandKind,
    /// Whether the final attempt succeeded
    pub success: bool,
    /// How the final attempt ended
    pub status: StepStatus,
    /// Response time of the final attempt (the full timeout when it timed out)
    pub response_time_ms: u64,
    /// Failure reason of the final attempt
    pub error: Option<String>,
    /// Attempts made, including the first
    pub attempts: u32,
}

/// Outcome of one full cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleResult {
    /// 1-based position of the cycle in its run
    pub cycle_number: u32,
    /// One entry per step actually executed, in order
    pub steps: Vec<StepResult>,
    /// Wall-clock time spent on the cycle
    pub duration_ms: u64,
    /// Set when the cycle aborted before completing its steps
    pub error: Option<String>,
}

impl CycleResult {
    /// A cycle succeeds iff it ran to the end and every step succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.steps.is_empty() && self.steps.iter().all(|s| s.success)
    }
}

/// Final statistics attached to a run on reaching a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStatistics {
    /// Successful cycles over executed cycles, in percent
    pub success_rate: f64,
    /// Mean step response time, rounded to the nearest millisecond
    pub avg_response_time_ms: u64,
    /// Fastest step response
    pub min_response_time_ms: u64,
    /// Slowest step response
    pub max_response_time_ms: u64,
    /// `end_time - start_time`
    pub total_duration_ms: u64,
    /// Number of steps recorded across all cycles, refused sends included
    pub total_steps: u64,
    /// Number of failed steps
    pub failed_steps: u64,
}

/// One execution of a test configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    /// Unique run id
    pub id: String,
    /// Configuration the run was started with
    pub config: TestConfiguration,
    /// When the run started
    pub start_time: DateTime<Utc>,
    /// When the run reached a terminal state
    pub end_time: Option<DateTime<Utc>>,
    /// Current lifecycle status
    pub status: TestStatus,
    /// Number of cycles executed so far
    pub current_cycle: u32,
    /// Cycles in which every step succeeded
    pub success_count: u32,
    /// Cycles with at least one failed step or a cycle-level error
    pub failure_count: u32,
    /// Cycle results in execution order
    pub results: Vec<CycleResult>,
    /// Populated on `Stopped`/`Completed` only
    pub statistics: Option<TestStatistics>,
    /// Why the run was forced to stop, if it was not an operator stop
    pub interruption: Option<String>,
}

impl TestRun {
    /// Create a fresh running run for `config`.
    pub fn new(config: TestConfiguration) -> Self {
        Self {
            id: new_run_id(),
            config,
            start_time: Utc::now(),
            end_time: None,
            status: TestStatus::Running,
            current_cycle: 0,
            success_count: 0,
            failure_count: 0,
            results: Vec::new(),
            statistics: None,
            interruption: None,
        }
    }

    /// Append a finished cycle and update the running counts.
    pub fn push_result(&mut self, result: CycleResult) {
        if result.is_success() {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.current_cycle = result.cycle_number;
        self.results.push(result);
    }

    /// Percentage of the target reached.
    pub fn progress_percent(&self) -> f64 {
        f64::from(self.current_cycle) / f64::from(self.config.target_cycles.max(1)) * 100.0
    }

    /// Whether every configured cycle has been executed.
    pub fn target_reached(&self) -> bool {
        self.current_cycle >= self.config.target_cycles
    }

    /// Snapshot without the result list.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id.clone(),
            status: self.status,
            target_cycles: self.config.target_cycles,
            current_cycle: self.current_cycle,
            success_count: self.success_count,
            failure_count: self.failure_count,
            start_time: self.start_time,
        }
    }
}

/// Lightweight view of a run, carried on every progress event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run id
    pub id: String,
    /// Status at the time of the snapshot
    pub status: TestStatus,
    /// Configured number of cycles
    pub target_cycles: u32,
    /// Cycles executed
    pub current_cycle: u32,
    /// Successful cycles
    pub success_count: u32,
    /// Failed cycles
    pub failure_count: u32,
    /// When the run started
    pub start_time: DateTime<Utc>,
}
