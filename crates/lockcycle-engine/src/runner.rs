//! Test runner state machine.
//!
//! ```text
//!          start            target reached
//!  Idle ──────────> Running ───────────────> Completed
//!                   │  ▲  │
//!             pause │  │ resume     stop / disconnect
//!                   ▼  │  └──────────────────────────> Stopped
//!                  Paused ───────────────────────────> Stopped
//! ```
//!
//! `Stopped` and `Completed` are terminal for a run; [`TestRunner::reset`]
//! returns the runner itself to `Idle` for the next one.
//!
//! # Execution model
//!
//! Each run is driven by one loop task that executes at most one cycle at a
//! time. `pause`/`stop` change the state immediately but are observed by the
//! loop only between cycles: the in-flight cycle always finishes and is
//! appended. A stopped run is finalized (end time and statistics attached,
//! `testStopped` emitted) once nothing is in flight.
//!
//! A second task per run watches the device link and forces `Stopped` on
//! disconnect.
//!
//! State lives behind a short-lived mutex that is never held across an await
//! or while events are dispatched, so every control operation except `start`
//! is synchronous and may be called from an event listener. Events are queued
//! on the bus while the mutex is held and delivered right after it is
//! released, so observers see them in transition order (`testStarted` always
//! precedes a concurrent `testStopped`).
//!
//! The loop yields to the scheduler after every cycle, so control operations
//! and the link watcher get to run even when cycles finish without waiting,
//! e.g. when every send is refused.

use lockcycle_core::{CycleResult, DeviceLink, LinkEvent, TestConfiguration, TestRun, TestStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::bus::{EventBus, TestEvent, TestProgress};
use crate::error::{EngineError, EngineResult};
use crate::executor::CycleExecutor;
use crate::statistics::{compute_statistics, RunningStatistics};

/// Reason attached to runs stopped by a link loss.
pub const DISCONNECT_REASON: &str = "device disconnected";

/// Runner state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// No run started, or the last one was reset
    #[default]
    Idle,
    /// Executing cycles
    Running,
    /// Suspended between cycles
    Paused,
    /// Ended early
    Stopped,
    /// Target reached
    Completed,
}

impl EngineState {
    /// Whether the current run has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineState::Stopped | EngineState::Completed)
    }

    fn status(&self) -> Option<TestStatus> {
        match self {
            EngineState::Idle => None,
            EngineState::Running => Some(TestStatus::Running),
            EngineState::Paused => Some(TestStatus::Paused),
            EngineState::Stopped => Some(TestStatus::Stopped),
            EngineState::Completed => Some(TestStatus::Completed),
        }
    }
}

impl From<TestStatus> for EngineState {
    fn from(status: TestStatus) -> Self {
        match status {
            TestStatus::Running => EngineState::Running,
            TestStatus::Paused => EngineState::Paused,
            TestStatus::Stopped => EngineState::Stopped,
            TestStatus::Completed => EngineState::Completed,
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Running => write!(f, "running"),
            EngineState::Paused => write!(f, "paused"),
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Default)]
struct Shared {
    state: EngineState,
    run: Option<TestRun>,
    running: RunningStatistics,
    /// A cycle has been started and not yet appended
    in_flight: bool,
    /// End time and statistics are attached
    finalized: bool,
    /// Bumped per run; stale tasks compare and exit
    generation: u64,
}

struct Inner {
    link: Arc<dyn DeviceLink>,
    executor: CycleExecutor,
    shared: Mutex<Shared>,
    state_tx: watch::Sender<EngineState>,
    bus: EventBus,
}

/// What the loop does after a re-check.
enum Next {
    Cycle(u32, TestConfiguration),
    Delay(u32, std::time::Duration),
    Wait,
    Exit,
}

impl Inner {
    /// Change state; the caller holds the lock.
    fn set_state(&self, shared: &mut Shared, state: EngineState) {
        shared.state = state;
        if let (Some(run), Some(status)) = (shared.run.as_mut(), state.status()) {
            run.status = status;
        }
        self.state_tx.send_replace(state);
    }

    /// Attach end time and statistics and build the terminal event.
    fn finalize(&self, shared: &mut Shared) -> Option<TestEvent> {
        if shared.finalized {
            return None;
        }
        let state = shared.state;
        let run = shared.run.as_mut()?;
        let end_time = chrono::Utc::now();
        run.end_time = Some(end_time);
        run.statistics = Some(compute_statistics(run, end_time));
        shared.finalized = true;

        let snapshot = run.clone();
        info!(
            run_id = %snapshot.id,
            status = %snapshot.status,
            cycles = snapshot.current_cycle,
            successes = snapshot.success_count,
            failures = snapshot.failure_count,
            "Test run finished"
        );
        match state {
            EngineState::Completed => Some(TestEvent::Completed(snapshot)),
            _ => Some(TestEvent::Stopped(snapshot)),
        }
    }

    /// Queue events for delivery; the caller holds the lock and flushes after
    /// releasing it.
    fn publish(&self, events: impl IntoIterator<Item = TestEvent>) {
        for event in events {
            self.bus.enqueue(event);
        }
    }

    /// Force `Stopped` because the link dropped.
    fn interrupt(&self, generation: u64, reason: &str) {
        {
            let mut shared = self.shared.lock();
            if shared.generation != generation
                || !matches!(shared.state, EngineState::Running | EngineState::Paused)
            {
                return;
            }
            self.set_state(&mut shared, EngineState::Stopped);
            if let Some(run) = shared.run.as_mut() {
                run.interruption = Some(reason.to_string());
            }
            warn!(reason, in_flight = shared.in_flight, "Test run interrupted");

            self.publish([TestEvent::Interrupted {
                reason: reason.to_string(),
            }]);
            if !shared.in_flight {
                let terminal = self.finalize(&mut shared);
                self.publish(terminal);
            }
        }
        self.bus.flush();
    }

    /// Decide the loop's next move; `delayed` is the cycle whose inter-cycle
    /// delay has already elapsed.
    fn next_step(&self, generation: u64, delayed: u32) -> Next {
        let mut shared = self.shared.lock();
        if shared.generation != generation {
            return Next::Exit;
        }
        match shared.state {
            EngineState::Paused => Next::Wait,
            EngineState::Running => {
                let Some(run) = shared.run.as_ref() else {
                    return Next::Exit;
                };
                if run.target_reached() {
                    self.set_state(&mut shared, EngineState::Completed);
                    let terminal = self.finalize(&mut shared);
                    self.publish(terminal);
                    return Next::Exit;
                }
                let number = run.current_cycle + 1;
                let config = run.config.clone();
                if run.current_cycle > 0 && config.inter_cycle_delay_ms > 0 && delayed != number {
                    return Next::Delay(number, config.inter_cycle_delay());
                }
                shared.in_flight = true;
                Next::Cycle(number, config)
            }
            _ => Next::Exit,
        }
    }

    /// Append a finished cycle and queue its events.
    fn append(&self, generation: u64, result: CycleResult) {
        let mut guard = self.shared.lock();
        let shared = &mut *guard;
        if shared.generation != generation {
            return;
        }
        shared.in_flight = false;
        shared.running.record(&result);
        let statistics = shared.running.clone();
        let Some(run) = shared.run.as_mut() else {
            return;
        };
        run.push_result(result.clone());
        debug!(
            cycle = result.cycle_number,
            success = result.is_success(),
            progress = run.progress_percent(),
            "Cycle appended"
        );

        self.publish([TestEvent::Progress(Box::new(TestProgress {
            test: run.summary(),
            progress: run.progress_percent(),
            cycle_result: result,
            statistics,
        }))]);
        if shared.state == EngineState::Stopped {
            let terminal = self.finalize(shared);
            self.publish(terminal);
        }
    }
}

async fn run_loop(inner: Arc<Inner>, generation: u64) {
    let mut state_rx = inner.state_tx.subscribe();
    let mut delayed = 0;

    loop {
        state_rx.borrow_and_update();
        match inner.next_step(generation, delayed) {
            Next::Exit => {
                inner.bus.flush();
                return;
            }
            Next::Wait => {
                debug!("Run paused; waiting for resume");
                if state_rx.changed().await.is_err() {
                    return;
                }
            }
            Next::Delay(number, delay) => {
                tokio::select! {
                    _ = sleep(delay) => delayed = number,
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
            Next::Cycle(number, config) => {
                let result = inner.executor.run_cycle(number, &config).await;
                inner.append(generation, result);
                inner.bus.flush();
                tokio::task::yield_now().await;
            }
        }
    }
}

async fn watch_link(inner: Arc<Inner>, generation: u64, mut events: broadcast::Receiver<LinkEvent>) {
    let mut state_rx = inner.state_tx.subscribe();

    loop {
        state_rx.borrow_and_update();
        {
            let shared = inner.shared.lock();
            if shared.generation != generation || shared.state.is_terminal() {
                return;
            }
        }

        tokio::select! {
            event = events.recv() => match event {
                Ok(LinkEvent::Disconnected) | Err(RecvError::Closed) => {
                    inner.interrupt(generation, DISCONNECT_REASON);
                    return;
                }
                Ok(LinkEvent::Response(_)) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Link watcher lagged");
                    if !inner.link.is_connected() {
                        inner.interrupt(generation, DISCONNECT_REASON);
                        return;
                    }
                }
            },
            changed = state_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

/// Drives test runs against one device link.
///
/// Cheap to clone; clones share the same runner.
#[derive(Clone)]
pub struct TestRunner {
    inner: Arc<Inner>,
}

impl TestRunner {
    /// Runner over `link`, idle.
    pub fn new(link: Arc<dyn DeviceLink>) -> Self {
        let (state_tx, _) = watch::channel(EngineState::Idle);
        Self {
            inner: Arc::new(Inner {
                executor: CycleExecutor::new(link.clone()),
                link,
                shared: Mutex::new(Shared::default()),
                state_tx,
                bus: EventBus::new(),
            }),
        }
    }

    /// Current state.
    pub fn state(&self) -> EngineState {
        self.inner.shared.lock().state
    }

    /// Snapshot of the current (or last) run.
    pub fn current_run(&self) -> Option<TestRun> {
        self.inner.shared.lock().run.clone()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<EngineState> {
        self.inner.state_tx.subscribe()
    }

    /// Event bus of this runner.
    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Validate `config` and start a run.
    ///
    /// Must be called from within a Tokio runtime.
    #[instrument(skip(self, config), fields(target_cycles = config.target_cycles))]
    pub async fn start(&self, config: TestConfiguration) -> EngineResult<TestRun> {
        config.validate()?;

        let (run, generation, link_events) = {
            let mut shared = self.inner.shared.lock();
            if shared.state != EngineState::Idle {
                return Err(EngineError::AlreadyRunning(shared.state));
            }
            if !self.inner.link.is_connected() {
                return Err(EngineError::DeviceNotConnected);
            }

            let run = TestRun::new(config);
            shared.generation += 1;
            shared.run = Some(run.clone());
            shared.running = RunningStatistics::default();
            shared.in_flight = false;
            shared.finalized = false;
            self.inner.set_state(&mut shared, EngineState::Running);
            info!(run_id = %run.id, link = self.inner.link.name(), "Test run started");
            self.inner.publish([TestEvent::Started(run.clone())]);
            // Subscribed before the run is visible, so no disconnect is missed.
            (run, shared.generation, self.inner.link.subscribe())
        };
        self.inner.bus.flush();

        tokio::spawn(watch_link(self.inner.clone(), generation, link_events));
        tokio::spawn(run_loop(self.inner.clone(), generation));
        Ok(run)
    }

    /// Suspend after the in-flight cycle.
    pub fn pause(&self) -> EngineResult<()> {
        {
            let mut shared = self.inner.shared.lock();
            if shared.state != EngineState::Running {
                return Err(EngineError::InvalidStateTransition {
                    action: "pause",
                    state: shared.state,
                });
            }
            self.inner.set_state(&mut shared, EngineState::Paused);
            info!("Test run paused");
            self.inner.publish(shared.run.clone().map(TestEvent::Paused));
        }
        self.inner.bus.flush();
        Ok(())
    }

    /// Continue a paused run with the next cycle number.
    pub fn resume(&self) -> EngineResult<()> {
        {
            let mut shared = self.inner.shared.lock();
            if shared.state != EngineState::Paused {
                return Err(EngineError::InvalidStateTransition {
                    action: "resume",
                    state: shared.state,
                });
            }
            self.inner.set_state(&mut shared, EngineState::Running);
            info!("Test run resumed");
            self.inner.publish(shared.run.clone().map(TestEvent::Resumed));
        }
        self.inner.bus.flush();
        Ok(())
    }

    /// End the run. The in-flight cycle, if any, still finishes and is kept.
    pub fn stop(&self) -> EngineResult<()> {
        {
            let mut shared = self.inner.shared.lock();
            if !matches!(shared.state, EngineState::Running | EngineState::Paused) {
                return Err(EngineError::InvalidStateTransition {
                    action: "stop",
                    state: shared.state,
                });
            }
            self.inner.set_state(&mut shared, EngineState::Stopped);
            info!(in_flight = shared.in_flight, "Test run stopped");
            if !shared.in_flight {
                let terminal = self.inner.finalize(&mut shared);
                self.inner.publish(terminal);
            }
        }
        self.inner.bus.flush();
        Ok(())
    }

    /// Return a finished runner to `Idle`.
    ///
    /// The last run stays readable through [`current_run`](Self::current_run)
    /// until the next `start`.
    pub fn reset(&self) -> EngineResult<()> {
        let mut shared = self.inner.shared.lock();
        if !shared.state.is_terminal() && shared.state != EngineState::Idle {
            return Err(EngineError::InvalidStateTransition {
                action: "reset",
                state: shared.state,
            });
        }
        if shared.state.is_terminal() && !shared.finalized {
            // The stopping cycle has not been appended yet.
            return Err(EngineError::InvalidStateTransition {
                action: "reset",
                state: shared.state,
            });
        }
        shared.generation += 1;
        shared.state = EngineState::Idle;
        self.inner.state_tx.send_replace(EngineState::Idle);
        debug!("Runner reset");
        Ok(())
    }

    /// Wait until the terminal event of the current run has been delivered
    /// to every listener and subscriber, and return the final run.
    ///
    /// Returns `None` if no run was started.
    pub async fn wait_until_finished(&self) -> Option<TestRun> {
        let run_id = self.inner.shared.lock().run.as_ref()?.id.clone();
        let mut finished = self.inner.bus.watch_finished();
        let last = finished
            .wait_for(|last| last.as_ref().is_some_and(|run| run.id == run_id))
            .await
            .ok()?;
        (*last).clone()
    }
}

impl std::fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.inner.shared.lock();
        f.debug_struct("TestRunner")
            .field("link", &self.inner.link.name())
            .field("state", &shared.state)
            .field("run", &shared.run.as_ref().map(|r| r.id.as_str()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockcycle_core::{CommandKind, LinkError, LinkErrorKind, StepStatus};
    use lockcycle_driver_mock::SimulatedLockLink;
    use std::time::Duration;
    use tracing_test::traced_test;

    /// Connected, but refuses every command synchronously.
    struct RefusingLink {
        events: broadcast::Sender<LinkEvent>,
    }

    impl RefusingLink {
        fn new() -> Arc<Self> {
            let (events, _) = broadcast::channel(4);
            Arc::new(Self { events })
        }
    }

    impl DeviceLink for RefusingLink {
        fn is_connected(&self) -> bool {
            true
        }
        fn send_command(&self, _kind: CommandKind) -> Result<(), LinkError> {
            Err(LinkError::new(LinkErrorKind::Rejected, "busy"))
        }
        fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
            self.events.subscribe()
        }
    }

    fn quick(target_cycles: u32) -> TestConfiguration {
        TestConfiguration {
            inter_command_delay_ms: 0,
            response_timeout_ms: 1000,
            ..TestConfiguration::with_target_cycles(target_cycles)
        }
    }

    #[test]
    fn engine_state_mirrors_run_status() {
        assert_eq!(EngineState::from(TestStatus::Paused), EngineState::Paused);
        assert_eq!(EngineState::Completed.status(), Some(TestStatus::Completed));
        assert_eq!(EngineState::Idle.status(), None);
        assert!(EngineState::Stopped.is_terminal());
        assert!(!EngineState::Paused.is_terminal());
        assert_eq!(EngineState::Running.to_string(), "running");
    }

    #[tokio::test]
    async fn start_rejects_invalid_configuration() {
        let runner = TestRunner::new(Arc::new(SimulatedLockLink::new()));
        let err = runner.start(quick(0)).await.unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        assert_eq!(runner.state(), EngineState::Idle);
        assert!(runner.current_run().is_none());
    }

    #[tokio::test]
    async fn start_requires_connected_link() {
        let link = Arc::new(SimulatedLockLink::builder().connected(false).build());
        let runner = TestRunner::new(link);
        assert_eq!(runner.start(quick(1)).await, Err(EngineError::DeviceNotConnected));
        assert_eq!(runner.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let runner = TestRunner::new(Arc::new(SimulatedLockLink::new()));
        runner.start(quick(1000)).await.unwrap();
        assert_eq!(
            runner.start(quick(1)).await,
            Err(EngineError::AlreadyRunning(EngineState::Running))
        );
        runner.stop().unwrap();
    }

    #[tokio::test]
    async fn illegal_transitions_do_not_mutate() {
        let runner = TestRunner::new(Arc::new(SimulatedLockLink::new()));
        for (result, action) in [
            (runner.pause(), "pause"),
            (runner.resume(), "resume"),
            (runner.stop(), "stop"),
        ] {
            assert_eq!(
                result,
                Err(EngineError::InvalidStateTransition {
                    action,
                    state: EngineState::Idle
                })
            );
        }
        assert_eq!(runner.state(), EngineState::Idle);
    }

    #[tokio::test]
    #[traced_test]
    async fn completes_and_resets() {
        let runner = TestRunner::new(Arc::new(SimulatedLockLink::new()));
        let mut state = runner.watch_state();
        runner.start(quick(3)).await.unwrap();

        let run = runner.wait_until_finished().await.unwrap();
        assert_eq!(run.status, TestStatus::Completed);
        assert_eq!(run.current_cycle, 3);
        assert_eq!(*state.borrow_and_update(), EngineState::Completed);
        assert!(logs_contain("Test run started"));

        assert_eq!(runner.reset(), Ok(()));
        assert_eq!(runner.state(), EngineState::Idle);
        runner.start(quick(1)).await.unwrap();
        let second = runner.wait_until_finished().await.unwrap();
        assert_ne!(second.id, run.id);
    }

    #[tokio::test]
    async fn reset_rejected_while_running() {
        let runner = TestRunner::new(Arc::new(SimulatedLockLink::new()));
        runner.start(quick(1000)).await.unwrap();
        assert!(matches!(
            runner.reset(),
            Err(EngineError::InvalidStateTransition { action: "reset", .. })
        ));
        runner.stop().unwrap();
        runner.wait_until_finished().await.unwrap();
        assert!(runner.reset().is_ok());
    }

    #[tokio::test]
    async fn stop_is_honoured_when_every_send_is_refused() {
        let runner = TestRunner::new(RefusingLink::new());
        runner.start(quick(200_000)).await.unwrap();

        // Single-threaded runtime: this only runs if the loop yields.
        let stopper = runner.clone();
        tokio::spawn(async move {
            stopper.stop().unwrap();
        });

        let run = runner.wait_until_finished().await.unwrap();
        assert_eq!(run.status, TestStatus::Stopped);
        assert!(run.current_cycle < 200_000);
        assert_eq!(run.success_count, 0);
        for cycle in &run.results {
            assert_eq!(cycle.steps.len(), 1);
            assert_eq!(cycle.steps[0].status, StepStatus::NotSent);
            assert_eq!(cycle.error.as_deref(), cycle.steps[0].error.as_deref());
        }
    }

    #[tokio::test]
    async fn started_is_delivered_before_a_stop_from_a_listener() {
        let runner = TestRunner::new(Arc::new(SimulatedLockLink::new()));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let stopper = runner.clone();
        runner.events().on(move |event| {
            sink.lock().push(event.name());
            if matches!(event, TestEvent::Started(_)) {
                stopper.stop().unwrap();
            }
        });

        runner.start(quick(10)).await.unwrap();
        let run = runner.wait_until_finished().await.unwrap();

        assert_eq!(run.status, TestStatus::Stopped);
        assert_eq!(run.current_cycle, 0);
        assert_eq!(*seen.lock(), vec!["testStarted", "testStopped"]);
    }

    #[tokio::test]
    async fn wait_until_finished_follows_terminal_delivery() {
        let runner = TestRunner::new(Arc::new(SimulatedLockLink::new()));
        let delivered = Arc::new(Mutex::new(false));
        let flag = delivered.clone();
        runner.events().on(move |event| {
            if event.is_terminal() {
                *flag.lock() = true;
            }
        });

        runner.start(quick(2)).await.unwrap();
        let run = runner.wait_until_finished().await.unwrap();
        assert!(*delivered.lock());
        assert_eq!(run.status, TestStatus::Completed);

        // A finished runner answers immediately, also after reset.
        runner.reset().unwrap();
        assert_eq!(runner.wait_until_finished().await.unwrap().id, run.id);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_inter_cycle_delay_finalizes_immediately() {
        let runner = TestRunner::new(Arc::new(SimulatedLockLink::new()));
        let config = TestConfiguration {
            inter_cycle_delay_ms: 60_000,
            ..quick(5)
        };
        runner.start(config).await.unwrap();

        // Let the first cycle finish; the loop then sleeps a minute.
        tokio::time::sleep(Duration::from_millis(10)).await;
        runner.stop().unwrap();

        let run = runner.current_run().unwrap();
        assert_eq!(run.status, TestStatus::Stopped);
        assert_eq!(run.current_cycle, 1);
        assert!(run.statistics.is_some());
        assert!(run.end_time.is_some());
    }
}
