//! Application error type.
//!
//! `AppError` gathers the failures the `lockcycle` application can surface:
//!
//! - **`Config`**: the figment provider chain could not produce an
//!   [`AppConfig`](crate::config::AppConfig) (unreadable TOML, wrongly typed
//!   environment override).
//! - **`Validation`**: the configuration parsed but holds values that make no
//!   sense (unknown log level, inverted latency range).
//! - **`TestConfiguration`**: the `[test]` table breaks a run invariant.
//! - **`Engine`**: the runner refused a start or a transition.
//! - **`Io`** / **`Serialization`**: writing the JSON report.
//!
//! Step and cycle failures are never errors here; they are part of the
//! recorded run.

use lockcycle_core::ConfigurationError;
use lockcycle_engine::EngineError;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Errors surfaced by the `lockcycle` application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Figment could not load or deserialize the configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// A configuration value is out of range.
    #[error("Configuration validation error: {0}")]
    Validation(String),

    /// The test configuration breaks a run invariant.
    #[error("Invalid test configuration: {0}")]
    TestConfiguration(#[from] ConfigurationError),

    /// The engine rejected an operation.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// The run ended without a final snapshot.
    #[error("Test run ended without a result")]
    NoResult,

    /// Logging could not be initialised.
    #[error("Failed to initialize tracing: {0}")]
    Logging(String),

    /// File I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<figment::Error> for AppError {
    fn from(err: figment::Error) -> Self {
        AppError::Config(Box::new(err))
    }
}
