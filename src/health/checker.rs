//! Staleness checker implementation.

use std::time::Duration;

use super::{HealthVerdict, LivenessStatus};
use crate::heartbeat::{to_datetime, unix_now, Heartbeat};

/// Compares the heartbeat against the wall clock.
///
/// Read-only: checking never mutates the heartbeat, so repeated checks
/// without an intervening write agree with each other.
#[derive(Debug, Clone)]
pub struct StalenessChecker {
    heartbeat: Heartbeat,
    max_delay: Duration,
}

impl StalenessChecker {
    pub fn new(heartbeat: Heartbeat, max_delay: Duration) -> Self {
        Self {
            heartbeat,
            max_delay,
        }
    }

    /// Check against the current wall-clock time.
    pub fn check(&self) -> HealthVerdict {
        self.check_at(unix_now())
    }

    /// Check against `now` (UNIX seconds).
    ///
    /// Healthy iff `now - heartbeat < max_delay`.
    pub fn check_at(&self, now: f64) -> HealthVerdict {
        let last = self.heartbeat.read();
        let delay_secs = now - last;
        let status = if delay_secs < self.max_delay.as_secs_f64() {
            LivenessStatus::Healthy
        } else {
            LivenessStatus::Stale
        };

        HealthVerdict {
            status,
            last_success: to_datetime(last),
            delay_secs,
        }
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }
}
