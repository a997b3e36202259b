//! Engine error types.
//!
//! Only configuration and state-transition problems are surfaced as errors,
//! synchronously, to the caller of `start`/`pause`/`resume`/`stop`. Step and
//! cycle failures are recorded as data and never leave the execution loop.

use lockcycle_core::{CommandKind, ConfigurationError, LinkError};
use thiserror::Error;

use crate::runner::EngineState;

/// Convenience alias for engine results.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors returned by [`TestRunner`](crate::runner::TestRunner) operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The configuration was rejected before any state transition.
    #[error("Invalid test configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The device link reported disconnected at start.
    #[error("Device is not connected")]
    DeviceNotConnected,

    /// `start` was called while the runner was not idle.
    #[error("Cannot start: engine is {0}")]
    AlreadyRunning(EngineState),

    /// `pause`/`resume`/`stop`/`reset` was called from a state that does not allow it.
    #[error("Cannot {action}: engine is {state}")]
    InvalidStateTransition {
        /// Requested operation
        action: &'static str,
        /// State the runner was in
        state: EngineState,
    },
}

/// Errors from issuing a correlated command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    /// A command of this kind is already awaiting its response.
    #[error("A '{0}' command is already pending")]
    AlreadyPending(CommandKind),

    /// The link refused the command.
    #[error(transparent)]
    Send(#[from] LinkError),
}
