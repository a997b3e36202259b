//! Typed event bus for run lifecycle notifications.
//!
//! Two ways to observe a runner:
//!
//! - **Listeners** registered with [`EventBus::on`] are called synchronously,
//!   in emission order, on the runner's own turn. A listener may call back
//!   into the runner (e.g. `pause()` on the third progress event) and the
//!   request is honoured before the next cycle starts.
//! - **Subscribers** from [`EventBus::subscribe`] receive the same events over
//!   a `tokio::sync::broadcast` channel, for async consumers such as
//!   persistence. Slow subscribers lag; they never slow the runner down.
//!
//! Events are delivered one at a time in emission order. An event emitted
//! from inside a listener is queued and delivered once the current event has
//! reached every listener. The runner queues its events while it still holds
//! its state lock and delivers them after releasing it, so the delivery order
//! always matches the order of the state transitions.
//!
//! [`EventBus::watch_finished`] reports the last run whose terminal event has
//! reached every listener and subscriber.
//!
//! Listener panics are caught and logged. Observers cannot affect engine
//! control flow except through the runner's public operations.

use lockcycle_core::{CycleResult, RunSummary, TestRun};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::warn;

use crate::statistics::RunningStatistics;

/// Default capacity of the broadcast channel.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Payload of a progress event.
#[derive(Debug, Clone, PartialEq)]
pub struct TestProgress {
    /// Run state after the cycle was appended
    pub test: RunSummary,
    /// The cycle that just finished
    pub cycle_result: CycleResult,
    /// `current_cycle / target_cycles * 100`
    pub progress: f64,
    /// Totals so far
    pub statistics: RunningStatistics,
}

/// Lifecycle events published by a runner.
#[derive(Debug, Clone, PartialEq)]
pub enum TestEvent {
    /// A run was started
    Started(TestRun),
    /// A cycle finished and was appended
    Progress(Box<TestProgress>),
    /// The run was paused
    Paused(TestRun),
    /// The run was resumed
    Resumed(TestRun),
    /// The run ended early; statistics are attached
    Stopped(TestRun),
    /// The run reached its target; statistics are attached
    Completed(TestRun),
    /// The run was forced to stop by the device link
    Interrupted {
        /// Human-readable reason
        reason: String,
    },
}

impl TestEvent {
    /// Event name, as used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            TestEvent::Started(_) => "testStarted",
            TestEvent::Progress(_) => "testProgress",
            TestEvent::Paused(_) => "testPaused",
            TestEvent::Resumed(_) => "testResumed",
            TestEvent::Stopped(_) => "testStopped",
            TestEvent::Completed(_) => "testCompleted",
            TestEvent::Interrupted { .. } => "testInterrupted",
        }
    }

    /// The run snapshot carried by the event, if it carries a full one.
    pub fn run(&self) -> Option<&TestRun> {
        match self {
            TestEvent::Started(run)
            | TestEvent::Paused(run)
            | TestEvent::Resumed(run)
            | TestEvent::Stopped(run)
            | TestEvent::Completed(run) => Some(run),
            TestEvent::Progress(_) | TestEvent::Interrupted { .. } => None,
        }
    }

    /// Whether the event marks the end of a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TestEvent::Stopped(_) | TestEvent::Completed(_))
    }
}

/// Handle returned by [`EventBus::on`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&TestEvent) + Send + Sync>;

#[derive(Default)]
struct Dispatch {
    queue: VecDeque<TestEvent>,
    active: bool,
}

/// Registration and dispatch of [`TestEvent`]s.
pub struct EventBus {
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
    dispatch: Mutex<Dispatch>,
    sender: broadcast::Sender<TestEvent>,
    finished: watch::Sender<Option<TestRun>>,
}

impl EventBus {
    /// Create a bus with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus whose broadcast channel holds `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            dispatch: Mutex::new(Dispatch::default()),
            sender,
            finished: watch::channel(None).0,
        }
    }

    /// Register a synchronous listener.
    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&TestEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Subscribe to the broadcast stream.
    pub fn subscribe(&self) -> broadcast::Receiver<TestEvent> {
        self.sender.subscribe()
    }

    /// Receiver of the last run whose `testStopped`/`testCompleted` has been
    /// fully delivered.
    pub fn watch_finished(&self) -> watch::Receiver<Option<TestRun>> {
        self.finished.subscribe()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Publish an event.
    ///
    /// If another emission is being delivered, the event is queued behind it
    /// and this call returns without waiting.
    pub fn emit(&self, event: TestEvent) {
        self.enqueue(event);
        self.flush();
    }

    /// Queue an event without delivering it.
    ///
    /// Takes only the dispatch lock, so it is safe to call while holding a
    /// lock that listeners also take. Pair with [`flush`](Self::flush).
    pub(crate) fn enqueue(&self, event: TestEvent) {
        self.dispatch.lock().queue.push_back(event);
    }

    /// Deliver queued events, unless a delivery is already in progress; that
    /// one picks them up.
    pub(crate) fn flush(&self) {
        {
            let mut dispatch = self.dispatch.lock();
            if dispatch.active || dispatch.queue.is_empty() {
                return;
            }
            dispatch.active = true;
        }

        loop {
            let next = {
                let mut dispatch = self.dispatch.lock();
                let next = dispatch.queue.pop_front();
                if next.is_none() {
                    dispatch.active = false;
                }
                next
            };
            match next {
                Some(event) => self.deliver(event),
                None => return,
            }
        }
    }

    fn deliver(&self, event: TestEvent) {
        // Snapshot so listeners may register or remove listeners re-entrantly.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(event = event.name(), "Event listener panicked; ignoring");
            }
        }

        let finished = event.is_terminal().then(|| event.run().cloned()).flatten();
        // No subscribers is fine.
        let _ = self.sender.send(event);
        if let Some(run) = finished {
            self.finished.send_replace(Some(run));
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
