//! Error types shared across the lockcycle crates.
//!
//! Using `thiserror`, this module defines the errors that cross crate
//! boundaries:
//!
//! - **`LinkError`**: raised synchronously by a [`DeviceLink`](crate::link::DeviceLink)
//!   when a command cannot be enqueued (e.g. the link is not connected).
//! - **`ConfigurationError`**: semantic problems with a
//!   [`TestConfiguration`](crate::configuration::TestConfiguration), rejected
//!   before any state transition happens.
//! - **`StepError`**: why a single command/response exchange failed. These are
//!   never thrown out of the execution loop; they are rendered into
//!   [`StepResult::error`](crate::run::StepResult::error) as data.
//! - **`StoreError`**: failures reported by a
//!   [`RecordStore`](crate::record::RecordStore) implementation.

use thiserror::Error;

use crate::command::CommandKind;

// =============================================================================
// Link Errors
// =============================================================================

/// Category of a [`LinkError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkErrorKind {
    /// The link has no active connection to the device.
    NotConnected,
    /// The transport failed while handing the command over.
    Communication,
    /// The device reported a hardware fault.
    Hardware,
    /// The transport gave up waiting.
    Timeout,
    /// The link refused the command (busy, malformed, ...).
    Rejected,
}

impl std::fmt::Display for LinkErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LinkErrorKind::NotConnected => "not_connected",
            LinkErrorKind::Communication => "communication",
            LinkErrorKind::Hardware => "hardware",
            LinkErrorKind::Timeout => "timeout",
            LinkErrorKind::Rejected => "rejected",
        };
        write!(f, "{}", label)
    }
}

/// Error raised by a device link when a command cannot be sent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Device link {kind} error: {message}")]
pub struct LinkError {
    /// Error category
    pub kind: LinkErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl LinkError {
    /// Create a new link error.
    pub fn new(kind: LinkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for the error every link returns while disconnected.
    pub fn not_connected() -> Self {
        Self::new(LinkErrorKind::NotConnected, "device is not connected")
    }
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// A test configuration that parses but cannot be executed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// `target_cycles` must be at least 1.
    #[error("target_cycles must be at least 1")]
    ZeroTargetCycles,

    /// `response_timeout_ms` must be at least 1.
    #[error("response_timeout_ms must be at least 1")]
    ZeroResponseTimeout,

    /// A cycle needs at least one command.
    #[error("cycle template must contain at least one command")]
    EmptyCycle,

    /// Retrying is enabled but no retries are allowed.
    #[error("retry is enabled but max_retries is 0")]
    ZeroRetries,
}

// =============================================================================
// Step Errors
// =============================================================================

/// Why one step of a cycle failed.
///
/// Recovered locally as a failed step; the `Display` output is what ends up in
/// the recorded step and attempt rows.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// No response arrived before the timeout.
    #[error("timeout")]
    Timeout,

    /// The device answered but reported failure.
    #[error("{0}")]
    DeviceFailure(String),

    /// The link dropped while the step was outstanding.
    #[error("device disconnected")]
    Disconnected,
}

impl StepError {
    /// Build a device failure from the optional error carried in a response.
    pub fn device_failure(kind: CommandKind, error: Option<&str>) -> Self {
        match error {
            Some(msg) if !msg.is_empty() => StepError::DeviceFailure(msg.to_string()),
            _ => StepError::DeviceFailure(format!("{} failed", kind)),
        }
    }
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors reported by a record store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A session with this id already exists.
    #[error("session '{0}' already exists")]
    DuplicateSession(String),

    /// No session with this id exists.
    #[error("session '{0}' not found")]
    SessionNotFound(String),

    /// Backend-specific failure.
    #[error("record store backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_error_display_includes_kind() {
        let err = LinkError::not_connected();
        assert_eq!(
            err.to_string(),
            "Device link not_connected error: device is not connected"
        );
    }

    #[test]
    fn step_error_strings_match_recorded_values() {
        assert_eq!(StepError::Timeout.to_string(), "timeout");
        assert_eq!(StepError::Disconnected.to_string(), "device disconnected");
        assert_eq!(
            StepError::device_failure(CommandKind::Lock, Some("jammed")).to_string(),
            "jammed"
        );
        assert_eq!(
            StepError::device_failure(CommandKind::Unlock, None).to_string(),
            "unlock failed"
        );
    }
}
