//! The monitored application, as seen by the heartbeat updater.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Error returned by a monitored client when it cannot report.
pub type ClientError = Box<dyn std::error::Error + Send + Sync>;

/// Anything that can say when it last did useful work.
///
/// The updater polls this from the parent process; it never looks at the
/// client's internals. Errors are logged and retried after a backoff.
pub trait MonitoredClient: Send + Sync + 'static {
    /// Time of the last successful unit of work.
    fn last_success_timestamp(&self) -> Result<DateTime<Utc>, ClientError>;
}

impl<T: MonitoredClient + ?Sized> MonitoredClient for Arc<T> {
    fn last_success_timestamp(&self) -> Result<DateTime<Utc>, ClientError> {
        (**self).last_success_timestamp()
    }
}

impl<T: MonitoredClient + ?Sized> MonitoredClient for Box<T> {
    fn last_success_timestamp(&self) -> Result<DateTime<Utc>, ClientError> {
        (**self).last_success_timestamp()
    }
}

/// Ready-made client for applications that just want to record progress.
///
/// Call [`SuccessTracker::mark_success`] after each completed unit of work.
#[derive(Debug)]
pub struct SuccessTracker {
    /// Last success as UNIX microseconds.
    last_success_us: AtomicI64,
}

impl Default for SuccessTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SuccessTracker {
    /// Create a tracker whose last success is now.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(at: DateTime<Utc>) -> Self {
        Self {
            last_success_us: AtomicI64::new(at.timestamp_micros()),
        }
    }

    /// Record a success at the current time.
    pub fn mark_success(&self) {
        self.mark_success_at(Utc::now());
    }

    pub fn mark_success_at(&self, at: DateTime<Utc>) {
        self.last_success_us
            .store(at.timestamp_micros(), Ordering::Relaxed);
    }

    /// Last recorded success.
    pub fn last_success(&self) -> DateTime<Utc> {
        crate::heartbeat::to_datetime(
            self.last_success_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        )
    }
}

impl MonitoredClient for SuccessTracker {
    fn last_success_timestamp(&self) -> Result<DateTime<Utc>, ClientError> {
        Ok(self.last_success())
    }
}
