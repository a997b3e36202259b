//! Application wiring.
//!
//! [`LockCycleApp`] owns one simulated device link, one runner and one record
//! store, built from an [`AppConfig`]. Nothing here is global: every app (and
//! every test) gets its own instances.

use lockcycle_core::{DeviceLink, TestRun};
use lockcycle_driver_mock::SimulatedLockLink;
use lockcycle_engine::{spawn_recorder, MemoryRecordStore, Recorder, TestEvent, TestRunner};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};

/// Runs lock cycle tests against the configured device link.
pub struct LockCycleApp {
    config: AppConfig,
    link: Arc<SimulatedLockLink>,
    runner: TestRunner,
    store: Arc<MemoryRecordStore>,
    recorder: Recorder,
}

impl LockCycleApp {
    /// Validate `config` and build the link, runner and recorder.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;

        let link = Arc::new(SimulatedLockLink::from_config(&config.simulator));
        let runner = TestRunner::new(link.clone() as Arc<dyn DeviceLink>);
        let store = Arc::new(MemoryRecordStore::new());
        let recorder = spawn_recorder(runner.events(), store.clone());

        runner.events().on(log_event);

        Ok(Self {
            config,
            link,
            runner,
            store,
            recorder,
        })
    }

    /// Effective configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The runner, e.g. to stop it from a signal handler.
    pub fn runner(&self) -> &TestRunner {
        &self.runner
    }

    /// The simulated device link.
    pub fn link(&self) -> &Arc<SimulatedLockLink> {
        &self.link
    }

    /// Persisted sessions and attempts.
    pub fn store(&self) -> &Arc<MemoryRecordStore> {
        &self.store
    }

    /// Start a run with the configured test parameters and wait for it to end.
    ///
    /// Returns once the final run has also been written to the store.
    pub async fn run(&self) -> AppResult<TestRun> {
        self.runner.start(self.config.test.clone()).await?;
        let run = self
            .runner
            .wait_until_finished()
            .await
            .ok_or(AppError::NoResult)?;
        if !self.recorder.wait_recorded(&run.id).await {
            warn!(run_id = %run.id, "Recorder ended before the run was written");
        }
        Ok(run)
    }

    /// Stop the background recorder.
    pub fn shutdown(&self) {
        self.recorder.abort();
    }
}

impl Drop for LockCycleApp {
    fn drop(&mut self) {
        self.recorder.abort();
    }
}

/// Write a run as pretty-printed JSON.
pub fn write_report(path: &Path, run: &TestRun) -> AppResult<()> {
    let json = serde_json::to_string_pretty(run)?;
    std::fs::write(path, json)?;
    info!(path = %path.display(), "Report written");
    Ok(())
}

fn log_event(event: &TestEvent) {
    match event {
        TestEvent::Started(run) => info!(
            run_id = %run.id,
            target_cycles = run.config.target_cycles,
            "Starting lock cycle test"
        ),
        TestEvent::Progress(progress) => info!(
            cycle = progress.cycle_result.cycle_number,
            target = progress.test.target_cycles,
            success = progress.cycle_result.is_success(),
            duration_ms = progress.cycle_result.duration_ms,
            percent = %format_args!("{:.1}", progress.progress),
            success_rate = %format_args!("{:.1}", progress.statistics.success_rate()),
            "Cycle finished"
        ),
        TestEvent::Interrupted { reason } => warn!(%reason, "Test interrupted"),
        TestEvent::Paused(_) | TestEvent::Resumed(_) => info!(event = event.name(), "Test state changed"),
        TestEvent::Stopped(_) | TestEvent::Completed(_) => {}
    }
}
