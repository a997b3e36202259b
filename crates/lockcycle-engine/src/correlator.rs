//! Response correlation.
//!
//! Matches an issued command to its asynchronous answer on the device link,
//! bounded by a timeout. Each issued command is a [`PendingCommand`], a small
//! state machine:
//!
//! ```text
//! Sent ──response──> Resolved
//!   │ ──deadline───> TimedOut
//!   └ ──disconnect─> Aborted
//! ```
//!
//! Resolution consumes the pending command, so it happens exactly once. At
//! most one command per [`CommandKind`] is outstanding; the kind is released
//! when the pending command is dropped, whichever way it ended.

use lockcycle_core::{CommandKind, DeviceLink, LinkEvent, StepError};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::error::CorrelationError;

/// How a pending command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The device answered (successfully or not)
    Resolved,
    /// No answer before the deadline
    TimedOut,
    /// The link dropped while waiting
    Aborted,
}

/// Result of one correlated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// Command issued
    pub kind: CommandKind,
    /// How the wait ended
    pub resolution: Resolution,
    /// Elapsed time since issue; the full timeout when timed out
    pub response_time_ms: u64,
    /// Failure reason, `None` on success
    pub error: Option<StepError>,
}

impl StepOutcome {
    /// Whether the device executed the command.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Whether the link dropped while waiting.
    pub fn is_disconnect(&self) -> bool {
        self.resolution == Resolution::Aborted
    }
}

/// Releases a kind from the pending set when dropped.
struct PendingSlot {
    kind: CommandKind,
    pending: Arc<Mutex<HashSet<CommandKind>>>,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.kind);
    }
}

/// A command that was sent and is awaiting its response.
pub struct PendingCommand {
    kind: CommandKind,
    events: broadcast::Receiver<LinkEvent>,
    issued_at: Instant,
    timeout: Duration,
    _slot: PendingSlot,
}

impl PendingCommand {
    /// Wait for the response, the deadline or a disconnect.
    pub async fn resolve(mut self) -> StepOutcome {
        let deadline = self.issued_at + self.timeout;
        loop {
            match timeout_at(deadline, self.events.recv()).await {
                Err(_) => {
                    warn!(command = %self.kind, timeout_ms = self.timeout.as_millis() as u64, "Command timed out");
                    return self.finish(
                        Resolution::TimedOut,
                        self.timeout.as_millis() as u64,
                        Some(StepError::Timeout),
                    );
                }
                Ok(Ok(LinkEvent::Response(response))) if response.kind == self.kind => {
                    let error = (!response.success)
                        .then(|| StepError::device_failure(self.kind, response.error.as_deref()));
                    return self.finish(Resolution::Resolved, self.elapsed_ms(), error);
                }
                Ok(Ok(LinkEvent::Response(_))) => continue,
                Ok(Ok(LinkEvent::Disconnected)) | Ok(Err(RecvError::Closed)) => {
                    return self.finish(
                        Resolution::Aborted,
                        self.elapsed_ms(),
                        Some(StepError::Disconnected),
                    );
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    warn!(command = %self.kind, skipped, "Link event receiver lagged");
                }
            }
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.issued_at.elapsed().as_millis() as u64
    }

    fn finish(&self, resolution: Resolution, response_time_ms: u64, error: Option<StepError>) -> StepOutcome {
        debug!(command = %self.kind, ?resolution, response_time_ms, "Command resolved");
        StepOutcome {
            kind: self.kind,
            resolution,
            response_time_ms,
            error,
        }
    }
}

impl std::fmt::Debug for PendingCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCommand")
            .field("kind", &self.kind)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Issues commands on a device link and correlates their responses.
#[derive(Clone)]
pub struct ResponseCorrelator {
    link: Arc<dyn DeviceLink>,
    pending: Arc<Mutex<HashSet<CommandKind>>>,
}

impl ResponseCorrelator {
    /// Correlator over `link`.
    pub fn new(link: Arc<dyn DeviceLink>) -> Self {
        Self {
            link,
            pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Whether a command of `kind` is awaiting its response.
    pub fn is_pending(&self, kind: CommandKind) -> bool {
        self.pending.lock().contains(&kind)
    }

    /// Send `kind` and return the pending command.
    ///
    /// Subscribes before sending, so a response cannot be missed. Fails
    /// without sending if a command of the same kind is already pending.
    pub fn issue(&self, kind: CommandKind, timeout: Duration) -> Result<PendingCommand, CorrelationError> {
        if !self.pending.lock().insert(kind) {
            return Err(CorrelationError::AlreadyPending(kind));
        }
        let slot = PendingSlot {
            kind,
            pending: self.pending.clone(),
        };

        let events = self.link.subscribe();
        let issued_at = Instant::now();
        self.link.send_command(kind)?;
        debug!(link = self.link.name(), command = %kind, "Command sent");

        Ok(PendingCommand {
            kind,
            events,
            issued_at,
            timeout,
            _slot: slot,
        })
    }

    /// Send `kind` and wait for its outcome.
    pub async fn send_and_await(&self, kind: CommandKind, timeout: Duration) -> Result<StepOutcome, CorrelationError> {
        Ok(self.issue(kind, timeout)?.resolve().await)
    }
}

impl std::fmt::Debug for ResponseCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCorrelator")
            .field("link", &self.link.name())
            .field("pending", &*self.pending.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockcycle_core::{CommandResponse, LinkError};
    use lockcycle_driver_mock::{ErrorConfig, ErrorScenario, LatencyProfile, MockMode, SimulatedLockLink};

    /// Link that accepts everything and never answers on its own.
    struct ManualLink {
        events: broadcast::Sender<LinkEvent>,
    }

    impl ManualLink {
        fn new() -> Arc<Self> {
            let (events, _) = broadcast::channel(16);
            Arc::new(Self { events })
        }
    }

    impl DeviceLink for ManualLink {
        fn is_connected(&self) -> bool {
            true
        }
        fn send_command(&self, _kind: CommandKind) -> Result<(), LinkError> {
            Ok(())
        }
        fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
            self.events.subscribe()
        }
    }

    #[tokio::test]
    async fn resolves_with_device_response() {
        let link = Arc::new(SimulatedLockLink::new());
        let correlator = ResponseCorrelator::new(link.clone());

        let outcome = correlator
            .send_and_await(CommandKind::Lock, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.resolution, Resolution::Resolved);
        assert!(link.is_locked());
        assert!(!correlator.is_pending(CommandKind::Lock));
    }

    #[tokio::test]
    async fn device_failure_carries_reason() {
        let link = Arc::new(
            SimulatedLockLink::builder()
                .error_config(ErrorConfig::scenario(ErrorScenario::DeviceFault { code: 3 }))
                .build(),
        );
        let correlator = ResponseCorrelator::new(link);

        let outcome = correlator
            .send_and_await(CommandKind::Unlock, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(outcome.resolution, Resolution::Resolved);
        assert_eq!(outcome.error, Some(StepError::DeviceFailure("Device fault: 3".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reports_full_timeout() {
        let correlator = ResponseCorrelator::new(ManualLink::new());

        let outcome = correlator
            .send_and_await(CommandKind::Unlock, Duration::from_millis(750))
            .await
            .unwrap();

        assert_eq!(outcome.resolution, Resolution::TimedOut);
        assert_eq!(outcome.response_time_ms, 750);
        assert_eq!(outcome.error.map(|e| e.to_string()).as_deref(), Some("timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn responses_for_other_kinds_are_ignored() {
        let link = ManualLink::new();
        let correlator = ResponseCorrelator::new(link.clone());
        let pending = correlator.issue(CommandKind::Lock, Duration::from_millis(500)).unwrap();

        link.events
            .send(LinkEvent::Response(CommandResponse::ok(CommandKind::Unlock)))
            .unwrap();
        let outcome = pending.resolve().await;

        assert_eq!(outcome.resolution, Resolution::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_aborts_before_deadline() {
        let link = ManualLink::new();
        let correlator = ResponseCorrelator::new(link.clone());
        let pending = correlator.issue(CommandKind::Unlock, Duration::from_secs(30)).unwrap();

        let sender = link.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            let _ = sender.send(LinkEvent::Disconnected);
        });
        let outcome = pending.resolve().await;

        assert!(outcome.is_disconnect());
        assert_eq!(outcome.error, Some(StepError::Disconnected));
        assert!(outcome.response_time_ms < 30_000);
    }

    #[tokio::test]
    async fn second_pending_command_of_same_kind_fails_fast() {
        let correlator = ResponseCorrelator::new(ManualLink::new());
        let first = correlator.issue(CommandKind::Unlock, Duration::from_secs(1)).unwrap();

        let second = correlator.issue(CommandKind::Unlock, Duration::from_secs(1));
        assert!(matches!(second, Err(CorrelationError::AlreadyPending(CommandKind::Unlock))));

        // Other kinds are independent.
        let other = correlator.issue(CommandKind::Lock, Duration::from_secs(1));
        assert!(other.is_ok());

        drop(first);
        assert!(!correlator.is_pending(CommandKind::Unlock));
        assert!(correlator.issue(CommandKind::Unlock, Duration::from_secs(1)).is_ok());
    }

    #[tokio::test]
    async fn send_failure_releases_kind() {
        let link = Arc::new(SimulatedLockLink::builder().connected(false).build());
        let correlator = ResponseCorrelator::new(link);

        let err = correlator
            .issue(CommandKind::Lock, Duration::from_secs(1))
            .unwrap_err();

        assert!(matches!(err, CorrelationError::Send(_)));
        assert!(!correlator.is_pending(CommandKind::Lock));
    }

    #[tokio::test]
    async fn realistic_latency_is_measured() {
        let link = Arc::new(
            SimulatedLockLink::builder()
                .mode(MockMode::Realistic)
                .latency(LatencyProfile::fixed(20))
                .build(),
        );
        let correlator = ResponseCorrelator::new(link);

        let outcome = correlator
            .send_and_await(CommandKind::Unlock, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert!(outcome.response_time_ms >= 20);
    }
}
