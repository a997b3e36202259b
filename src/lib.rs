//! # lockcycle
//!
//! Repeated open/close cycle testing for lock devices. A run sends a fixed
//! sequence of commands (unlock, then lock) to a device many times, times each
//! response, and reports reliability and latency statistics.
//!
//! ## Crate Structure
//!
//! The workspace is split by responsibility:
//!
//! - **`lockcycle-core`**: data model, Device Link and record-store contracts
//! - **`lockcycle-driver-mock`**: simulated lock device with latency and failure injection
//! - **`lockcycle-engine`**: correlation, cycle execution, the run state machine and statistics
//!
//! This crate adds the application layer on top:
//!
//! - **`app`**: wires a link, a runner and a record store from configuration
//! - **`config`**: layered configuration (defaults, TOML file, environment)
//! - **`error`**: the `AppError` type
//! - **`logging`**: tracing subscriber setup

pub mod app;
pub mod config;
pub mod error;
pub mod logging;

pub use app::{write_report, LockCycleApp};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
