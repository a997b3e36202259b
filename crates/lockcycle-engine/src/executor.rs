//! Cycle execution.
//!
//! Runs one cycle: every command of the configured template, strictly in
//! order, each correlated with its response and retried per the
//! [`RetryPolicy`](lockcycle_core::RetryPolicy). Step failures are data; the
//! executor never returns an error.

use lockcycle_core::{
    CommandKind, CycleResult, DeviceLink, StepError, StepResult, StepStatus, TestConfiguration,
};
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, instrument, warn};

use crate::correlator::{ResponseCorrelator, StepOutcome};

/// How a step ended, from the cycle's point of view.
enum StepRun {
    /// The step finished; the cycle continues
    Done(StepResult),
    /// The link dropped during the step; the cycle ends here
    Disconnected(StepResult),
    /// A send was refused; the cycle ends here
    SendFailed(StepResult),
}

fn step_result(outcome: StepOutcome, attempts: u32) -> StepResult {
    StepResult {
        kind: outcome.kind,
        success: outcome.error.is_none(),
        status: StepStatus::from_error(outcome.error.as_ref()),
        response_time_ms: outcome.response_time_ms,
        error: outcome.error.map(|e| e.to_string()),
        attempts,
    }
}

fn refused_step(kind: CommandKind, message: String, attempts: u32) -> StepResult {
    StepResult {
        kind,
        success: false,
        status: StepStatus::NotSent,
        response_time_ms: 0,
        error: Some(message),
        attempts,
    }
}

/// Executes cycles against one device link.
#[derive(Debug, Clone)]
pub struct CycleExecutor {
    correlator: ResponseCorrelator,
}

impl CycleExecutor {
    /// Executor over `link`.
    pub fn new(link: Arc<dyn DeviceLink>) -> Self {
        Self {
            correlator: ResponseCorrelator::new(link),
        }
    }

    /// Run every step of one cycle.
    #[instrument(skip(self, config), fields(steps = config.cycle.len()))]
    pub async fn run_cycle(&self, cycle_number: u32, config: &TestConfiguration) -> CycleResult {
        let started = Instant::now();
        let mut steps = Vec::with_capacity(config.cycle.len());
        let mut error = None;

        for (index, kind) in config.cycle.iter().copied().enumerate() {
            match self.run_step(kind, config).await {
                StepRun::Done(step) => steps.push(step),
                StepRun::Disconnected(step) => {
                    steps.push(step);
                    error = Some(StepError::Disconnected.to_string());
                    break;
                }
                StepRun::SendFailed(step) => {
                    warn!(command = %kind, message = ?step.error, "Send failed; aborting cycle");
                    error = step.error.clone();
                    steps.push(step);
                    break;
                }
            }

            let is_last = index + 1 == config.cycle.len();
            if !is_last && config.inter_command_delay_ms > 0 {
                sleep(config.inter_command_delay()).await;
            }
        }

        let result = CycleResult {
            cycle_number,
            steps,
            duration_ms: started.elapsed().as_millis() as u64,
            error,
        };
        debug!(success = result.is_success(), duration_ms = result.duration_ms, "Cycle finished");
        result
    }

    async fn run_step(&self, kind: CommandKind, config: &TestConfiguration) -> StepRun {
        let max_attempts = config.retry.max_attempts();
        let mut last: Option<StepResult> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                sleep(config.retry.retry_delay()).await;
            }

            let outcome = match self
                .correlator
                .send_and_await(kind, config.response_timeout())
                .await
            {
                Ok(outcome) => outcome,
                Err(err) => return StepRun::SendFailed(refused_step(kind, err.to_string(), attempt)),
            };

            let disconnected = outcome.is_disconnect();
            let step = step_result(outcome, attempt);
            if disconnected {
                return StepRun::Disconnected(step);
            }
            if step.success {
                return StepRun::Done(step);
            }
            if attempt < max_attempts {
                debug!(command = %kind, attempt, error = ?step.error, "Step failed; retrying");
            }
            last = Some(step);
        }

        match last {
            Some(step) => StepRun::Done(step),
            // max_attempts is at least 1, so the loop ran.
            None => StepRun::SendFailed(refused_step(kind, format!("{} was never attempted", kind), 0)),
        }
    }
}
