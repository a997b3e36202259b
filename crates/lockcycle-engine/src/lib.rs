//! `lockcycle-engine`
//!
//! Executes lock open/close cycle tests against a [`DeviceLink`].
//!
//! - [`correlator`]: matches each command to its response, bounded by a timeout
//! - [`executor`]: runs one cycle, with retries and inter-step delays
//! - [`runner`]: the run state machine and its execution loop
//! - [`statistics`]: running and final statistics
//! - [`bus`]: typed lifecycle events
//! - [`store`]: in-memory record store and the bus-to-store recorder
//!
//! # Example
//!
//! ```rust,ignore
//! use lockcycle_engine::{TestRunner, TestEvent};
//!
//! let runner = TestRunner::new(link);
//! runner.events().on(|event| {
//!     if let TestEvent::Progress(p) = event {
//!         println!("{:.0}%", p.progress);
//!     }
//! });
//! runner.start(TestConfiguration::with_target_cycles(10)).await?;
//! let run = runner.wait_until_finished().await;
//! ```
//!
//! [`DeviceLink`]: lockcycle_core::DeviceLink

pub mod bus;
pub mod correlator;
pub mod error;
pub mod executor;
pub mod runner;
pub mod statistics;
pub mod store;

pub use bus::{EventBus, ListenerId, TestEvent, TestProgress};
pub use correlator::{PendingCommand, Resolution, ResponseCorrelator, StepOutcome};
pub use error::{CorrelationError, EngineError, EngineResult};
pub use executor::CycleExecutor;
pub use runner::{EngineState, TestRunner, DISCONNECT_REASON};
pub use statistics::{compute_statistics, RunningStatistics};
pub use store::{record_run, spawn_recorder, MemoryRecordStore, Recorder};
