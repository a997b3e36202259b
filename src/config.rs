//! Configuration loading using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. `config/lockcycle.toml` (or a file given on the command line)
//! 3. Environment variables prefixed with `LOCKCYCLE_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use lockcycle::config::AppConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("Cycles: {}", config.test.target_cycles);
//! # Ok(())
//! # }
//! ```
//!
//! `LOCKCYCLE_TEST__TARGET_CYCLES=500` overrides `[test] target_cycles`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use lockcycle_core::TestConfiguration;
use lockcycle_driver_mock::SimulatedLinkConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{AppError, AppResult};
use crate::logging::OutputFormat;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/lockcycle.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "LOCKCYCLE_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Test run parameters
    pub test: TestConfiguration,
    /// Simulated device link
    pub simulator: SimulatedLinkConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "lockcycle".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from the default file and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    /// The provider chain, exposed for tests and tooling.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(AppError::Validation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        self.application
            .log_format
            .parse::<OutputFormat>()
            .map_err(AppError::Validation)?;

        self.simulator
            .validate()
            .map_err(|msg| AppError::Validation(format!("Invalid simulator settings: {}", msg)))?;

        self.test.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.application.name, "lockcycle");
        assert_eq!(config.test.target_cycles, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = AppConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(matches!(config.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_invalid_log_format() {
        let mut config = AppConfig::default();
        config.application.log_format = "xml".to_string();
        assert!(matches!(config.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_invalid_failure_rate() {
        let mut config = AppConfig::default();
        config.simulator.failure_rate = 1.5;
        assert!(matches!(config.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_invalid_test_section() {
        let mut config = AppConfig::default();
        config.test.response_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(AppError::TestConfiguration(_))));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file("does/not/exist.toml"))
            .extract()
            .unwrap();
        assert_eq!(config, AppConfig::default());
    }
}
