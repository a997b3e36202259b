//! Run persistence.
//!
//! [`MemoryRecordStore`] keeps sessions and attempts in process memory.
//! [`spawn_recorder`] connects any [`RecordStore`] to a runner's event bus and
//! returns a [`Recorder`] handle that can wait for a run to be written.

use async_trait::async_trait;
use lockcycle_core::{AttemptRecord, RecordStore, SessionRecord, StoreError, TestRun};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::{EventBus, TestEvent};

/// In-memory [`RecordStore`].
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    sessions: RwLock<Vec<SessionRecord>>,
    attempts: RwLock<HashMap<String, Vec<AttemptRecord>>>,
}

impl MemoryRecordStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_session(&self, session: SessionRecord) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write();
        if sessions.iter().any(|s| s.id == session.id) {
            return Err(StoreError::DuplicateSession(session.id));
        }
        sessions.push(session);
        Ok(())
    }

    async fn update_session(&self, session: SessionRecord) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write();
        match sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => {
                *existing = session;
                Ok(())
            }
            None => Err(StoreError::SessionNotFound(session.id)),
        }
    }

    async fn get_session(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.sessions.read().iter().find(|s| s.id == id).cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionRecord>, StoreError> {
        Ok(self.sessions.read().clone())
    }

    async fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|s| s.id != id);
        if sessions.len() == before {
            return Err(StoreError::SessionNotFound(id.to_string()));
        }
        self.attempts.write().remove(id);
        Ok(())
    }

    async fn insert_attempts(&self, attempts: Vec<AttemptRecord>) -> Result<(), StoreError> {
        let sessions = self.sessions.read();
        let mut stored = self.attempts.write();
        for attempt in attempts {
            if !sessions.iter().any(|s| s.id == attempt.session_id) {
                return Err(StoreError::SessionNotFound(attempt.session_id));
            }
            stored
                .entry(attempt.session_id.clone())
                .or_default()
                .push(attempt);
        }
        Ok(())
    }

    async fn list_attempts(&self, session_id: &str) -> Result<Vec<AttemptRecord>, StoreError> {
        Ok(self
            .attempts
            .read()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Write a finished run: its session row and one attempt row per step.
///
/// Creates the session if it was never announced.
pub async fn record_run(store: &dyn RecordStore, run: &TestRun) -> Result<(), StoreError> {
    let session = SessionRecord::from_run(run);
    match store.update_session(session.clone()).await {
        Ok(()) => {}
        Err(StoreError::SessionNotFound(_)) => store.create_session(session).await?,
        Err(err) => return Err(err),
    }
    store.insert_attempts(AttemptRecord::from_run(run)).await
}

/// Handle of a recorder task started by [`spawn_recorder`].
#[derive(Debug)]
pub struct Recorder {
    task: JoinHandle<()>,
    recorded: watch::Receiver<Option<String>>,
}

impl Recorder {
    /// Wait until the terminal event of run `run_id` has been written.
    ///
    /// Returns false if the recorder ended first. Only the most recently
    /// finished run is tracked.
    pub async fn wait_recorded(&self, run_id: &str) -> bool {
        let mut recorded = self.recorded.clone();
        let ok = recorded
            .wait_for(|last| last.as_deref() == Some(run_id))
            .await
            .is_ok();
        ok
    }

    /// Stop the recorder task.
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Persist every run published on `bus` into `store`.
///
/// A session row is created on `testStarted` and completed on
/// `testStopped`/`testCompleted`. Store failures are logged and skipped.
pub fn spawn_recorder(bus: &EventBus, store: Arc<dyn RecordStore>) -> Recorder {
    let mut events = bus.subscribe();
    let (recorded_tx, recorded) = watch::channel(None);
    let task = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Recorder lagged behind the event bus");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let result = match &event {
                TestEvent::Started(run) => store.create_session(SessionRecord::from_run(run)).await,
                TestEvent::Stopped(run) | TestEvent::Completed(run) => {
                    record_run(store.as_ref(), run).await
                }
                _ => continue,
            };
            match result {
                Ok(()) => debug!(event = event.name(), "Run recorded"),
                Err(err) => warn!(event = event.name(), error = %err, "Failed to record run"),
            }
            if let Some(run) = event.run().filter(|_| event.is_terminal()) {
                recorded_tx.send_replace(Some(run.id.clone()));
            }
        }
    });
    Recorder { task, recorded }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lockcycle_core::{
        AttemptResult, CommandKind, CycleResult, StepResult, StepStatus, TestConfiguration, TestStatus,
    };

    fn finished_run() -> TestRun {
        let mut run = TestRun::new(TestConfiguration::with_target_cycles(1));
        run.push_result(CycleResult {
            cycle_number: 1,
            steps: vec![
                StepResult {
                    kind: CommandKind::Unlock,
                    success: true,
                    status: StepStatus::Succeeded,
                    response_time_ms: 120,
                    error: None,
                    attempts: 1,
                },
                StepResult {
                    kind: CommandKind::Lock,
                    success: false,
                    status: StepStatus::TimedOut,
                    response_time_ms: 5000,
                    error: Some("timeout".into()),
                    attempts: 1,
                },
            ],
            duration_ms: 5120,
            error: None,
        });
        run.status = TestStatus::Completed;
        run.end_time = Some(Utc::now());
        run
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let store = MemoryRecordStore::new();
        let run = finished_run();
        let session = SessionRecord::from_run(&run);

        store.create_session(session.clone()).await.unwrap();
        assert!(matches!(
            store.create_session(session.clone()).await,
            Err(StoreError::DuplicateSession(_))
        ));
        assert_eq!(store.get_session(&run.id).await.unwrap(), Some(session));

        store.delete_session(&run.id).await.unwrap();
        assert!(store.get_session(&run.id).await.unwrap().is_none());
        assert!(matches!(
            store.delete_session(&run.id).await,
            Err(StoreError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn attempts_require_a_session() {
        let store = MemoryRecordStore::new();
        let run = finished_run();
        let err = store
            .insert_attempts(AttemptRecord::from_run(&run))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn record_run_writes_session_and_attempts() {
        let store = MemoryRecordStore::new();
        let run = finished_run();

        record_run(&store, &run).await.unwrap();

        let session = store.get_session(&run.id).await.unwrap().unwrap();
        assert_eq!(session.status, TestStatus::Completed);
        assert_eq!(session.total_attempts, 1);
        let attempts = store.list_attempts(&run.id).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[1].result, AttemptResult::Timeout);
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn recorder_reports_written_runs() {
        let bus = EventBus::new();
        let store = Arc::new(MemoryRecordStore::new());
        let recorder = spawn_recorder(&bus, store.clone());
        let run = finished_run();

        bus.emit(TestEvent::Started(TestRun {
            status: TestStatus::Running,
            end_time: None,
            ..run.clone()
        }));
        bus.emit(TestEvent::Completed(run.clone()));

        assert!(recorder.wait_recorded(&run.id).await);
        let session = store.get_session(&run.id).await.unwrap().unwrap();
        assert_eq!(session.status, TestStatus::Completed);
        assert_eq!(store.list_attempts(&run.id).await.unwrap().len(), 2);
        recorder.abort();
    }
}
