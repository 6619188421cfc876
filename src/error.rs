//! Liveness probe error types.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::config::ConfigError;
use crate::coordinator::ProbeState;

/// Errors that can occur while setting up or running the liveness probe.
#[derive(Debug)]
pub enum LivenessError {
    /// Mapping the shared heartbeat page failed.
    SharedMemory(io::Error),

    /// Launching the health server worker process failed.
    Spawn {
        /// Worker executable we tried to run.
        program: PathBuf,
        /// Underlying OS error.
        error: io::Error,
    },

    /// The health server could not bind its listener.
    Bind {
        /// Address we tried to bind.
        addr: SocketAddr,
        /// Underlying OS error.
        error: io::Error,
    },

    /// Other IO error (control pipe, listener setup).
    Io(io::Error),

    /// Lifecycle operation called in the wrong state.
    InvalidState {
        /// State the operation requires.
        expected: ProbeState,
        /// State the probe was actually in.
        actual: ProbeState,
    },

    /// Invalid configuration.
    Config(ConfigError),
}

impl LivenessError {
    /// Check if this is a bind error.
    pub fn is_bind(&self) -> bool {
        matches!(self, LivenessError::Bind { .. })
    }

    /// Check if this is a lifecycle state error.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, LivenessError::InvalidState { .. })
    }
}

impl fmt::Display for LivenessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LivenessError::SharedMemory(e) => write!(f, "failed to map heartbeat memory: {}", e),
            LivenessError::Spawn { program, error } => write!(
                f,
                "failed to spawn health server worker {}: {}",
                program.display(),
                error
            ),
            LivenessError::Bind { addr, error } => {
                write!(f, "failed to bind health server on {}: {}", addr, error)
            }
            LivenessError::Io(e) => write!(f, "IO error: {}", e),
            LivenessError::InvalidState { expected, actual } => {
                write!(f, "liveness probe is {}, expected {}", actual, expected)
            }
            LivenessError::Config(e) => write!(f, "invalid configuration: {}", e),
        }
    }
}

impl std::error::Error for LivenessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LivenessError::SharedMemory(e) | LivenessError::Io(e) => Some(e),
            LivenessError::Bind { error, .. } | LivenessError::Spawn { error, .. } => Some(error),
            LivenessError::Config(e) => Some(e),
            LivenessError::InvalidState { .. } => None,
        }
    }
}

impl From<ConfigError> for LivenessError {
    fn from(e: ConfigError) -> Self {
        LivenessError::Config(e)
    }
}

impl From<io::Error> for LivenessError {
    fn from(e: io::Error) -> Self {
        LivenessError::Io(e)
    }
}
