//! Statistics aggregation.
//!
//! Two views over the same data:
//!
//! - [`RunningStatistics`] is updated incrementally as each cycle is appended
//!   and travels with every progress event.
//! - [`compute_statistics`] is a pure function over a run's results, evaluated
//!   once on the `Stopped`/`Completed` transition. Its output is attached to
//!   the run and never changes afterwards.
//!
//! Response times only cover steps that reached the link; a refused send
//! counts as a failed step but has no response time.

use chrono::{DateTime, Utc};
use lockcycle_core::{CycleResult, TestRun, TestStatistics};
use serde::{Deserialize, Serialize};

fn percent(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        0.0
    } else {
        f64::from(part) / f64::from(whole) * 100.0
    }
}

fn rounded_mean(total: u64, count: u64) -> u64 {
    if count == 0 {
        0
    } else {
        (total as f64 / count as f64).round() as u64
    }
}

/// Incrementally maintained totals for a run in progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStatistics {
    /// Cycles recorded
    pub cycles: u32,
    /// Cycles in which every step succeeded
    pub successful_cycles: u32,
    /// Steps recorded
    pub steps: u64,
    /// Failed steps
    pub failed_steps: u64,
    /// Steps with a measured response time
    pub timed_steps: u64,
    /// Sum of step response times
    pub total_response_time_ms: u64,
    /// Fastest step so far
    pub min_response_time_ms: Option<u64>,
    /// Slowest step so far
    pub max_response_time_ms: Option<u64>,
}

impl RunningStatistics {
    /// Fold one finished cycle into the totals.
    pub fn record(&mut self, cycle: &CycleResult) {
        self.cycles += 1;
        if cycle.is_success() {
            self.successful_cycles += 1;
        }
        for step in &cycle.steps {
            self.steps += 1;
            if !step.success {
                self.failed_steps += 1;
            }
            if !step.status.was_sent() {
                continue;
            }
            self.timed_steps += 1;
            self.total_response_time_ms += step.response_time_ms;
            self.min_response_time_ms = Some(
                self.min_response_time_ms
                    .map_or(step.response_time_ms, |m| m.min(step.response_time_ms)),
            );
            self.max_response_time_ms = Some(
                self.max_response_time_ms
                    .map_or(step.response_time_ms, |m| m.max(step.response_time_ms)),
            );
        }
    }

    /// Successful cycles over recorded cycles, in percent.
    pub fn success_rate(&self) -> f64 {
        percent(self.successful_cycles, self.cycles)
    }

    /// Mean step response time, rounded.
    pub fn avg_response_time_ms(&self) -> u64 {
        rounded_mean(self.total_response_time_ms, self.timed_steps)
    }
}

/// Final statistics of a run, as of `end_time`.
pub fn compute_statistics(run: &TestRun, end_time: DateTime<Utc>) -> TestStatistics {
    let steps = move || run.results.iter().flat_map(|cycle| cycle.steps.iter());
    let response_times: Vec<u64> = steps()
        .filter(|step| step.status.was_sent())
        .map(|step| step.response_time_ms)
        .collect();
    let failed_steps = steps().filter(|step| !step.success).count() as u64;
    let total: u64 = response_times.iter().sum();

    TestStatistics {
        success_rate: percent(run.success_count, run.current_cycle),
        avg_response_time_ms: rounded_mean(total, response_times.len() as u64),
        min_response_time_ms: response_times.iter().copied().min().unwrap_or(0),
        max_response_time_ms: response_times.iter().copied().max().unwrap_or(0),
        total_duration_ms: (end_time - run.start_time).num_milliseconds().max(0) as u64,
        total_steps: steps().count() as u64,
        failed_steps,
    }
}
