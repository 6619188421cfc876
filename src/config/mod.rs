//! Configuration module for liveness_probe.
//!
//! This module provides centralized configuration loading from environment variables.
//!
//! # Example
//!
//! ```rust,ignore
//! use liveness_probe::config::Config;
//!
//! let config = Config::from_env()?;
//! println!("Liveness port: {}", config.liveness.port);
//! println!("Max delay: {:?}", config.liveness.max_delay);
//! ```

mod error;
mod liveness;
mod logging;
mod parse;

pub use error::ConfigError;
pub use liveness::{LivenessConfig, DEFAULT_LIVENESS_PORT, DEFAULT_MAX_DELAY, WORKER_BIN_NAME};
pub use logging::{LogFormat, LoggingConfig};
pub use parse::{format_duration, parse_duration};
pub(crate) use parse::{env_duration, env_opt, env_parse};

/// Serializes tests that touch process environment variables.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Complete application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Liveness probe configuration.
    pub liveness: LivenessConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            liveness: LivenessConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }

    /// Print configuration summary to log.
    pub fn log_summary(&self) {
        use tracing::info;

        info!("Configuration loaded:");
        info!("  Liveness: http://{}", self.liveness.bind_addr());
        info!("  Max delay: {}", format_duration(self.liveness.max_delay));
        info!(
            "  Poll interval: {}",
            format_duration(self.liveness.poll_interval)
        );
        info!(
            "  Retry backoff: {}",
            format_duration(self.liveness.retry_backoff)
        );
        info!(
            "  Terminate grace: {}",
            format_duration(self.liveness.terminate_grace)
        );
        info!(
            "  Worker: {}",
            self.liveness.worker_program().display()
        );
        info!("  Log format: {:?}", self.logging.format);
    }
}
