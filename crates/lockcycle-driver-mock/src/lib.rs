//! Simulated lock device for lockcycle
//!
//! This crate provides a [`DeviceLink`](lockcycle_core::DeviceLink) backed by a
//! simulated lock, for testing without physical hardware. All delays use
//! `tokio::time::sleep`, never `std::thread::sleep`.
//!
//! # Behavior
//!
//! - Responses arrive asynchronously after a latency drawn from a
//!   [`LatencyProfile`] (100-300ms by default, zero in [`MockMode::Instant`])
//! - Failures, silent drops and link loss are injected via [`ErrorConfig`]
//! - [`SimulatedLockLink::disconnect`] simulates radio loss
//!
//! # Example
//!
//! ```rust,ignore
//! use lockcycle_driver_mock::{SimulatedLockLink, MockMode, LatencyProfile, ErrorConfig};
//!
//! let link = SimulatedLockLink::builder()
//!     .mode(MockMode::Realistic)
//!     .latency(LatencyProfile::bluetooth())
//!     .error_config(ErrorConfig::random_failures_seeded(0.05, Some(7)))
//!     .build();
//! ```

pub mod common;
mod simulated_link;

// Re-export common types
pub use common::{ErrorConfig, ErrorScenario, LatencyProfile, MockMode, MockRng, ANY_OPERATION};

// Re-export link types
pub use simulated_link::{SimulatedLinkConfig, SimulatedLockLink, SimulatedLockLinkBuilder};
