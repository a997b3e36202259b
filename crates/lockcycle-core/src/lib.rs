//! `lockcycle-core`
//!
//! Core types and traits for lock cycle testing.
//!
//! This crate holds everything the engine and its collaborators agree on:
//!
//! - [`configuration`]: the immutable [`TestConfiguration`] of a run
//! - [`run`]: the [`TestRun`] entity and its [`CycleResult`]/[`StepResult`] records
//! - [`link`]: the [`DeviceLink`] contract the engine drives
//! - [`record`]: the session/attempt rows and the [`RecordStore`] contract
//! - [`error`]: errors shared across crates
//!
//! It contains no execution logic; see `lockcycle-engine` for that.

pub mod command;
pub mod configuration;
pub mod error;
pub mod link;
pub mod record;
pub mod run;

pub use command::CommandKind;
pub use configuration::{RetryPolicy, TestConfiguration};
pub use error::{ConfigurationError, LinkError, LinkErrorKind, StepError, StoreError};
pub use link::{CommandResponse, DeviceLink, LinkEvent};
pub use record::{AttemptRecord, AttemptResult, RecordStore, SessionRecord};
pub use run::{new_run_id, CycleResult, RunSummary, StepResult, StepStatus, TestRun, TestStatistics, TestStatus};
