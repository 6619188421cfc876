//! Health verdict types.

use chrono::{DateTime, Utc};
use hyper::StatusCode;

/// Outcome of a staleness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessStatus {
    /// Heartbeat younger than the max delay.
    Healthy,
    /// Heartbeat at or past the max delay.
    Stale,
}

impl LivenessStatus {
    /// HTTP status reported by the health endpoint.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Healthy => StatusCode::OK,
            Self::Stale => StatusCode::IM_A_TEAPOT,
        }
    }

    /// Response body reported by the health endpoint.
    pub fn body(&self) -> &'static str {
        match self {
            Self::Healthy => "OK",
            Self::Stale => "I'm a teapot",
        }
    }
}

impl std::fmt::Display for LivenessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Stale => write!(f, "stale"),
        }
    }
}

/// A single staleness check result.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthVerdict {
    pub status: LivenessStatus,
    /// Heartbeat value the check was made against.
    pub last_success: DateTime<Utc>,
    /// Seconds between the heartbeat and the check (negative if the
    /// heartbeat is ahead of the clock).
    pub delay_secs: f64,
}

impl HealthVerdict {
    /// Returns true if status is healthy.
    pub fn is_healthy(&self) -> bool {
        self.status == LivenessStatus::Healthy
    }
}
