//! Liveness probe configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use super::parse::{env_duration, env_opt, env_parse};
use super::ConfigError;
use crate::updater::UpdaterConfig;

/// Default health server port.
pub const DEFAULT_LIVENESS_PORT: u16 = 8511;

/// File name of the worker executable.
pub const WORKER_BIN_NAME: &str = "liveness-worker";

/// Default staleness threshold (1 hour).
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(3600);

/// Liveness probe configuration.
///
/// # Environment Variables
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `LIVENESS_PORT` | `8511` | Health server port |
/// | `LIVENESS_BIND_ADDR` | `0.0.0.0` | Health server bind IP |
/// | `LIVENESS_MAX_DELAY` | `1h` | Max heartbeat age before reporting unhealthy |
/// | `LIVENESS_POLL_INTERVAL` | `5s` | How often the monitored client is polled |
/// | `LIVENESS_RETRY_BACKOFF` | `30s` | Pause after a failed poll |
/// | `LIVENESS_TERMINATE_GRACE` | `200ms` | Wait between SIGTERM and SIGKILL on teardown |
/// | `LIVENESS_DRAIN_TIMEOUT` | `1s` | Worker drain time when its parent goes away |
/// | `LIVENESS_WORKER_BIN` | next to the executable | Path of the `liveness-worker` binary |
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Port the health server binds.
    pub port: u16,
    /// IP the health server binds.
    pub bind_ip: IpAddr,
    /// Staleness threshold.
    pub max_delay: Duration,
    /// Interval between successful polls.
    pub poll_interval: Duration,
    /// Pause after a failed poll.
    pub retry_backoff: Duration,
    /// Time the worker gets to die from SIGTERM before it gets SIGKILL.
    pub terminate_grace: Duration,
    /// Time in-flight health requests get to finish when the worker exits
    /// on its own (parent gone).
    pub drain_timeout: Duration,
    /// Worker executable; `None` looks next to the current executable.
    pub worker_bin: Option<PathBuf>,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_LIVENESS_PORT,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_delay: DEFAULT_MAX_DELAY,
            poll_interval: Duration::from_secs(5),
            retry_backoff: Duration::from_secs(30),
            terminate_grace: Duration::from_millis(200),
            drain_timeout: Duration::from_secs(1),
            worker_bin: None,
        }
    }
}

impl LivenessConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bind_ip = match env_opt("LIVENESS_BIND_ADDR") {
            Some(raw) => raw.parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::Parse {
                    key: "LIVENESS_BIND_ADDR".into(),
                    value: raw,
                    error: e.to_string(),
                }
            })?,
            None => defaults.bind_ip,
        };

        let config = Self {
            port: env_parse("LIVENESS_PORT", defaults.port)?,
            bind_ip,
            max_delay: env_duration("LIVENESS_MAX_DELAY", "1h")?.unwrap_or(Duration::ZERO),
            poll_interval: env_duration("LIVENESS_POLL_INTERVAL", "5s")?
                .unwrap_or(Duration::ZERO),
            retry_backoff: env_duration("LIVENESS_RETRY_BACKOFF", "30s")?
                .unwrap_or(Duration::ZERO),
            terminate_grace: env_duration("LIVENESS_TERMINATE_GRACE", "200ms")?
                .unwrap_or(Duration::ZERO),
            drain_timeout: env_duration("LIVENESS_DRAIN_TIMEOUT", "1s")?
                .unwrap_or(Duration::ZERO),
            worker_bin: env_opt("LIVENESS_WORKER_BIN").map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the probe cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_delay.is_zero() {
            return Err(ConfigError::Invalid {
                key: "LIVENESS_MAX_DELAY".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "LIVENESS_POLL_INTERVAL".into(),
                message: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Socket address the health server binds.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    pub fn with_worker_bin(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_bin = Some(path.into());
        self
    }

    /// Worker executable to launch.
    ///
    /// Without an explicit path this is `liveness-worker` in the directory
    /// of the current executable, or its parent when that directory is
    /// cargo's `deps/`.
    pub fn worker_program(&self) -> PathBuf {
        if let Some(path) = &self.worker_bin {
            return path.clone();
        }

        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(PathBuf::from))
            .unwrap_or_default();
        let candidate = exe_dir.join(WORKER_BIN_NAME);
        if !candidate.exists() && exe_dir.ends_with("deps") {
            if let Some(parent) = exe_dir.parent() {
                return parent.join(WORKER_BIN_NAME);
            }
        }
        candidate
    }

    /// Polling settings for the heartbeat updater.
    pub fn updater(&self) -> UpdaterConfig {
        UpdaterConfig {
            poll_interval: self.poll_interval,
            retry_backoff: self.retry_backoff,
        }
    }
}
