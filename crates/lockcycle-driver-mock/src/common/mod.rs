//! Common infrastructure for the simulated link.
//!
//! - **mode**: Operational modes (Instant, Realistic, Chaos)
//! - **timing**: Latency profiles
//! - **errors**: Error injection framework
//! - **rng**: Seeded random number generator

pub mod errors;
pub mod mode;
pub mod rng;
pub mod timing;

// Re-export commonly used types
pub use errors::{ErrorConfig, ErrorScenario, ANY_OPERATION};
pub use mode::MockMode;
pub use rng::MockRng;
pub use timing::LatencyProfile;
