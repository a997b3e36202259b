//! Record-store contract.
//!
//! On every terminal transition the engine hands out a serializable
//! [`TestRun`] snapshot. A record store persists it as one session row plus one
//! attempt row per executed step. This module defines the row shapes, the
//! mapping from a run, and the async [`RecordStore`] trait that backends
//! implement. No backend lives here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::CommandKind;
use crate::error::StoreError;
use crate::run::{StepResult, StepStatus, TestRun, TestStatus};

/// One row of the sessions table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Run id
    pub id: String,
    /// Run status when the row was written
    pub status: TestStatus,
    /// Cycles executed
    pub total_attempts: u32,
    /// Successful cycles
    pub successful_attempts: u32,
    /// Failed cycles
    pub failed_attempts: u32,
    /// Mean step response time in milliseconds
    pub average_response_time: u64,
    /// When the run started
    pub start_time: DateTime<Utc>,
    /// When the run ended
    pub end_time: Option<DateTime<Utc>>,
    /// Interruption reason for involuntary stops
    pub failure_reason: Option<String>,
}

/// Outcome stored for one attempt row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptResult {
    /// The device executed the command
    Success,
    /// The device reported failure, the link dropped or refused the command
    Failure,
    /// No response within the timeout
    Timeout,
}

/// One row of the attempts table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Owning session
    pub session_id: String,
    /// Cycle number the step belongs to
    pub attempt_number: u32,
    /// Command issued
    pub action: CommandKind,
    /// Outcome of the step
    pub result: AttemptResult,
    /// Response time in milliseconds
    pub response_time: u64,
    /// Failure reason, if any
    pub error_message: Option<String>,
}

impl AttemptResult {
    fn from_step(step: &StepResult) -> Self {
        match step.status {
            StepStatus::Succeeded => AttemptResult::Success,
            StepStatus::TimedOut => AttemptResult::Timeout,
            StepStatus::Failed | StepStatus::Disconnected | StepStatus::NotSent => AttemptResult::Failure,
        }
    }
}

impl SessionRecord {
    /// Build the session row for a run snapshot.
    pub fn from_run(run: &TestRun) -> Self {
        Self {
            id: run.id.clone(),
            status: run.status,
            total_attempts: run.current_cycle,
            successful_attempts: run.success_count,
            failed_attempts: run.failure_count,
            average_response_time: run
                .statistics
                .as_ref()
                .map(|s| s.avg_response_time_ms)
                .unwrap_or(0),
            start_time: run.start_time,
            end_time: run.end_time,
            failure_reason: run.interruption.clone(),
        }
    }
}

impl AttemptRecord {
    /// Build one attempt row per executed step of a run snapshot.
    pub fn from_run(run: &TestRun) -> Vec<Self> {
        run.results
            .iter()
            .flat_map(|cycle| {
                cycle.steps.iter().map(move |step| AttemptRecord {
                    session_id: run.id.clone(),
                    attempt_number: cycle.cycle_number,
                    action: step.kind,
                    result: AttemptResult::from_step(step),
                    response_time: step.response_time_ms,
                    error_message: step.error.clone(),
                })
            })
            .collect()
    }
}

/// Persistence collaborator for finished runs.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new session row.
    async fn create_session(&self, session: SessionRecord) -> Result<(), StoreError>;

    /// Replace an existing session row.
    async fn update_session(&self, session: SessionRecord) -> Result<(), StoreError>;

    /// Fetch a session row by id.
    async fn get_session(&self, id: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// All session rows, oldest first.
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>, StoreError>;

    /// Delete a session and its attempts.
    async fn delete_session(&self, id: &str) -> Result<(), StoreError>;

    /// Append attempt rows to a session.
    async fn insert_attempts(&self, attempts: Vec<AttemptRecord>) -> Result<(), StoreError>;

    /// Attempt rows of one session in insertion order.
    async fn list_attempts(&self, session_id: &str) -> Result<Vec<AttemptRecord>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::TestConfiguration;
    use crate::run::{CycleResult, TestStatistics};

    fn finished_run() -> TestRun {
        let mut run = TestRun::new(TestConfiguration::with_target_cycles(2));
        run.push_result(CycleResult {
            cycle_number: 1,
            steps: vec![
                StepResult {
                    kind: CommandKind::Unlock,
                    success: true,
                    status: StepStatus::Succeeded,
                    response_time_ms: 40,
                    error: None,
                    attempts: 1,
                },
                StepResult {
                    kind: CommandKind::Lock,
                    success: false,
                    status: StepStatus::TimedOut,
                    response_time_ms: 1000,
                    error: Some("timeout".into()),
                    attempts: 1,
                },
            ],
            duration_ms: 1040,
            error: None,
        });
        run.push_result(CycleResult {
            cycle_number: 2,
            steps: vec![StepResult {
                kind: CommandKind::Unlock,
                success: false,
                status: StepStatus::Failed,
                response_time_ms: 12,
                error: Some("motor stalled".into()),
                attempts: 2,
            }],
            duration_ms: 12,
            error: Some("device disconnected".into()),
        });
        run.status = TestStatus::Stopped;
        run.end_time = Some(Utc::now());
        run.interruption = Some("device disconnected".into());
        run.statistics = Some(TestStatistics {
            success_rate: 0.0,
            avg_response_time_ms: 351,
            min_response_time_ms: 12,
            max_response_time_ms: 1000,
            total_duration_ms: 1052,
            total_steps: 3,
            failed_steps: 2,
        });
        run
    }

    #[test]
    fn session_row_mirrors_run() {
        let run = finished_run();
        let session = SessionRecord::from_run(&run);
        assert_eq!(session.id, run.id);
        assert_eq!(session.status, TestStatus::Stopped);
        assert_eq!(session.total_attempts, 2);
        assert_eq!(session.successful_attempts, 0);
        assert_eq!(session.failed_attempts, 2);
        assert_eq!(session.average_response_time, 351);
        assert_eq!(session.failure_reason.as_deref(), Some("device disconnected"));
    }

    #[test]
    fn one_attempt_row_per_step() {
        let run = finished_run();
        let attempts = AttemptRecord::from_run(&run);
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[0].result, AttemptResult::Success);
        assert_eq!(attempts[1].result, AttemptResult::Timeout);
        assert_eq!(attempts[2].result, AttemptResult::Failure);
        assert_eq!(attempts[2].attempt_number, 2);
        assert_eq!(attempts[2].error_message.as_deref(), Some("motor stalled"));
        assert!(attempts.iter().all(|a| a.session_id == run.id));
    }

    #[test]
    fn refused_send_gets_an_attempt_row() {
        let mut run = TestRun::new(TestConfiguration::with_target_cycles(1));
        run.push_result(CycleResult {
            cycle_number: 1,
            steps: vec![StepResult {
                kind: CommandKind::Unlock,
                success: false,
                status: StepStatus::NotSent,
                response_time_ms: 0,
                // A device-side "timeout" message must not be taken for a timeout.
                error: Some("timeout".into()),
                attempts: 1,
            }],
            duration_ms: 0,
            error: Some("timeout".into()),
        });

        let attempts = AttemptRecord::from_run(&run);
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].result, AttemptResult::Failure);
        assert_eq!(attempts[0].action, CommandKind::Unlock);
    }
}
