//! Simulated lock device behind the [`DeviceLink`] contract.

use lockcycle_core::{CommandKind, CommandResponse, DeviceLink, LinkError, LinkErrorKind, LinkEvent};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;

use crate::common::{ErrorConfig, LatencyProfile, MockMode, MockRng};

/// Capacity of the event channel; slow subscribers beyond this lag.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// SimulatedLinkConfig - deserializable settings
// =============================================================================

/// Settings for building a [`SimulatedLockLink`] from configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedLinkConfig {
    /// Operational mode
    pub mode: MockMode,
    /// Fastest simulated response
    pub min_latency_ms: u64,
    /// Slowest simulated response
    pub max_latency_ms: u64,
    /// Probability that the device answers with failure
    pub failure_rate: f64,
    /// Probability that a command is never answered
    pub no_response_rate: f64,
    /// Seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for SimulatedLinkConfig {
    fn default() -> Self {
        let latency = LatencyProfile::bluetooth();
        Self {
            mode: MockMode::Realistic,
            min_latency_ms: latency.min_latency_ms,
            max_latency_ms: latency.max_latency_ms,
            failure_rate: 0.0,
            no_response_rate: 0.0,
            seed: None,
        }
    }
}

impl SimulatedLinkConfig {
    /// Check ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_latency_ms > self.max_latency_ms {
            return Err(format!(
                "min_latency_ms ({}) must not exceed max_latency_ms ({})",
                self.min_latency_ms, self.max_latency_ms
            ));
        }
        for (name, rate) in [
            ("failure_rate", self.failure_rate),
            ("no_response_rate", self.no_response_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(format!("{} must be within 0.0..=1.0, got {}", name, rate));
            }
        }
        Ok(())
    }
}

// =============================================================================
// SimulatedLockLink
// =============================================================================

/// What the simulated device does with one accepted command.
#[derive(Debug)]
enum Fate {
    Succeed,
    Fail(String),
    Silent,
    Disconnect,
}

/// Simulated lock device.
///
/// Accepts commands synchronously and answers them from a spawned task after a
/// latency drawn from its [`LatencyProfile`]. Failures, silent drops and link
/// loss are injected through an [`ErrorConfig`]; in [`MockMode::Chaos`] a
/// random failure rate is applied on top.
///
/// `send_command` must be called from within a Tokio runtime.
pub struct SimulatedLockLink {
    name: String,
    mode: MockMode,
    latency: LatencyProfile,
    error_config: ErrorConfig,
    chaos_failure_rate: f64,
    rng: Arc<MockRng>,
    connected: Arc<AtomicBool>,
    locked: Arc<AtomicBool>,
    commands_sent: AtomicU64,
    events: broadcast::Sender<LinkEvent>,
}

impl SimulatedLockLink {
    /// Connected link in [`MockMode::Instant`] with no injected errors.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start building a link.
    pub fn builder() -> SimulatedLockLinkBuilder {
        SimulatedLockLinkBuilder::new()
    }

    /// Build a link from deserialized settings.
    pub fn from_config(config: &SimulatedLinkConfig) -> Self {
        let mut errors = if config.failure_rate > 0.0 {
            ErrorConfig::random_failures_seeded(config.failure_rate, config.seed)
        } else {
            ErrorConfig::none()
        };
        if config.no_response_rate > 0.0 {
            errors = errors.with_no_response_rate(config.no_response_rate);
        }

        let mut builder = Self::builder()
            .mode(config.mode)
            .latency(LatencyProfile::new(config.min_latency_ms, config.max_latency_ms))
            .error_config(errors);
        if let Some(seed) = config.seed {
            builder = builder.seed(seed);
        }
        builder.build()
    }

    /// Drop the connection and notify subscribers.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::warn!(link = %self.name, "Simulated link disconnected");
            let _ = self.events.send(LinkEvent::Disconnected);
        }
    }

    /// Restore the connection.
    pub fn connect(&self) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            tracing::info!(link = %self.name, "Simulated link connected");
        }
    }

    /// Whether the simulated lock is currently closed.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    /// Number of commands accepted so far.
    pub fn commands_sent(&self) -> u64 {
        self.commands_sent.load(Ordering::SeqCst)
    }

    /// Operational mode.
    pub fn mode(&self) -> MockMode {
        self.mode
    }

    fn decide(&self, kind: CommandKind) -> Fate {
        match self.error_config.check_operation(kind.as_str()) {
            Ok(()) => {
                if self.mode == MockMode::Chaos && self.rng.should_fail(self.chaos_failure_rate) {
                    Fate::Fail(format!("{} actuator did not respond", kind))
                } else {
                    Fate::Succeed
                }
            }
            Err(err) => match err.kind {
                LinkErrorKind::Timeout => Fate::Silent,
                LinkErrorKind::Communication | LinkErrorKind::NotConnected => Fate::Disconnect,
                LinkErrorKind::Hardware | LinkErrorKind::Rejected => Fate::Fail(err.message),
            },
        }
    }

    fn latency(&self) -> Duration {
        if self.mode.simulates_latency() {
            self.latency.sample(&self.rng)
        } else {
            Duration::ZERO
        }
    }
}

impl Default for SimulatedLockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceLink for SimulatedLockLink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send_command(&self, kind: CommandKind) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::not_connected());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            LinkError::new(
                LinkErrorKind::Communication,
                "simulated link requires a Tokio runtime",
            )
        })?;

        self.commands_sent.fetch_add(1, Ordering::SeqCst);
        let fate = self.decide(kind);
        let latency = self.latency();
        tracing::debug!(link = %self.name, command = %kind, ?fate, ?latency, "Simulated command accepted");

        let events = self.events.clone();
        let connected = self.connected.clone();
        let locked = self.locked.clone();
        let name = self.name.clone();
        runtime.spawn(async move {
            if !latency.is_zero() {
                sleep(latency).await;
            }
            // A response in flight when the link dropped is lost with it.
            if !connected.load(Ordering::SeqCst) {
                return;
            }
            match fate {
                Fate::Succeed => {
                    locked.store(kind == CommandKind::Lock, Ordering::SeqCst);
                    let _ = events.send(LinkEvent::Response(CommandResponse::ok(kind)));
                }
                Fate::Fail(message) => {
                    let _ = events.send(LinkEvent::Response(CommandResponse::failed(kind, message)));
                }
                Fate::Silent => {}
                Fate::Disconnect => {
                    if connected.swap(false, Ordering::SeqCst) {
                        tracing::warn!(link = %name, "Simulated communication loss");
                        let _ = events.send(LinkEvent::Disconnected);
                    }
                }
            }
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`SimulatedLockLink`].
pub struct SimulatedLockLinkBuilder {
    name: String,
    mode: MockMode,
    latency: LatencyProfile,
    error_config: ErrorConfig,
    chaos_failure_rate: f64,
    seed: Option<u64>,
    connected: bool,
    locked: bool,
}

impl SimulatedLockLinkBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self {
            name: "simulated_lock".to_string(),
            mode: MockMode::Instant,
            latency: LatencyProfile::default(),
            error_config: ErrorConfig::none(),
            chaos_failure_rate: 0.1,
            seed: None,
            connected: true,
            locked: true,
        }
    }

    /// Name used in logs
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Operational mode
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Latency profile (ignored in [`MockMode::Instant`])
    pub fn latency(mut self, latency: LatencyProfile) -> Self {
        self.latency = latency;
        self
    }

    /// Error injection
    pub fn error_config(mut self, error_config: ErrorConfig) -> Self {
        self.error_config = error_config;
        self
    }

    /// Random failure rate applied in [`MockMode::Chaos`]
    pub fn chaos_failure_rate(mut self, rate: f64) -> Self {
        self.chaos_failure_rate = rate;
        self
    }

    /// Seed for latency sampling and chaos failures
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Initial connection state
    pub fn connected(mut self, connected: bool) -> Self {
        self.connected = connected;
        self
    }

    /// Initial lock state
    pub fn locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }

    /// Build the link
    pub fn build(self) -> SimulatedLockLink {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        SimulatedLockLink {
            name: self.name,
            mode: self.mode,
            latency: self.latency,
            error_config: self.error_config,
            chaos_failure_rate: self.chaos_failure_rate,
            rng: Arc::new(MockRng::new(self.seed)),
            connected: Arc::new(AtomicBool::new(self.connected)),
            locked: Arc::new(AtomicBool::new(self.locked)),
            commands_sent: AtomicU64::new(0),
            events,
        }
    }
}

impl Default for SimulatedLockLinkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ErrorScenario, ANY_OPERATION};
    use tokio::time::timeout;

    async fn next_event(rx: &mut broadcast::Receiver<LinkEvent>) -> Option<LinkEvent> {
        timeout(Duration::from_millis(500), rx.recv()).await.ok()?.ok()
    }

    #[tokio::test]
    async fn answers_commands_and_tracks_lock_state() {
        let link = SimulatedLockLink::new();
        let mut rx = link.subscribe();

        link.send_command(CommandKind::Unlock).unwrap();
        match next_event(&mut rx).await {
            Some(LinkEvent::Response(r)) => {
                assert_eq!(r.kind, CommandKind::Unlock);
                assert!(r.success);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(!link.is_locked());

        link.send_command(CommandKind::Lock).unwrap();
        assert!(matches!(next_event(&mut rx).await, Some(LinkEvent::Response(_))));
        assert!(link.is_locked());
        assert_eq!(link.commands_sent(), 2);
    }

    #[tokio::test]
    async fn rejects_commands_while_disconnected() {
        let link = SimulatedLockLink::builder().connected(false).build();
        let err = link.send_command(CommandKind::Unlock).unwrap_err();
        assert_eq!(err.kind, LinkErrorKind::NotConnected);
        assert_eq!(link.commands_sent(), 0);
    }

    #[tokio::test]
    async fn disconnect_emits_event_once() {
        let link = SimulatedLockLink::new();
        let mut rx = link.subscribe();
        link.disconnect();
        link.disconnect();
        assert_eq!(next_event(&mut rx).await, Some(LinkEvent::Disconnected));
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
        assert!(!link.is_connected());

        link.connect();
        assert!(link.is_connected());
    }

    #[tokio::test]
    async fn silent_commands_produce_no_response() {
        let link = SimulatedLockLink::builder()
            .error_config(ErrorConfig::scenario(ErrorScenario::NoResponse {
                operation: ANY_OPERATION,
            }))
            .build();
        let mut rx = link.subscribe();
        link.send_command(CommandKind::Lock).unwrap();
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn communication_loss_drops_the_link() {
        let link = SimulatedLockLink::builder()
            .error_config(ErrorConfig::scenario(ErrorScenario::CommunicationLoss {
                after: 1,
            }))
            .build();
        let mut rx = link.subscribe();

        link.send_command(CommandKind::Unlock).unwrap();
        assert!(matches!(next_event(&mut rx).await, Some(LinkEvent::Response(_))));

        link.send_command(CommandKind::Lock).unwrap();
        assert_eq!(next_event(&mut rx).await, Some(LinkEvent::Disconnected));
        assert!(!link.is_connected());
        assert!(link.send_command(CommandKind::Lock).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn realistic_mode_delays_responses() {
        let link = SimulatedLockLink::builder()
            .mode(MockMode::Realistic)
            .latency(LatencyProfile::fixed(120))
            .build();
        let mut rx = link.subscribe();
        let started = tokio::time::Instant::now();

        link.send_command(CommandKind::Unlock).unwrap();
        assert!(matches!(rx.recv().await, Ok(LinkEvent::Response(_))));
        assert!(started.elapsed() >= Duration::from_millis(120));
    }

    #[test]
    fn config_validation() {
        assert!(SimulatedLinkConfig::default().validate().is_ok());

        let inverted = SimulatedLinkConfig {
            min_latency_ms: 500,
            max_latency_ms: 100,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let bad_rate = SimulatedLinkConfig {
            failure_rate: 1.5,
            ..Default::default()
        };
        assert!(bad_rate.validate().is_err());
    }

    #[test]
    fn send_outside_runtime_is_an_error() {
        let link = SimulatedLockLink::new();
        let err = link.send_command(CommandKind::Unlock).unwrap_err();
        assert_eq!(err.kind, LinkErrorKind::Communication);
    }
}
