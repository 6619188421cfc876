//! Heartbeat updater task.
//!
//! Runs in the parent process. Every `poll_interval` it asks the monitored
//! client for its last success and writes it into the shared heartbeat.
//! A failed poll (an error or a panic inside the client) is logged and
//! followed by `retry_backoff` before the next attempt, so a client that
//! keeps failing produces one log line per backoff rather than a storm.
//! The loop only ends when it is cancelled.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::client::{ClientError, MonitoredClient};
use crate::heartbeat::{iso8601, Heartbeat};

/// Polling cadence for the updater.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdaterConfig {
    /// Pause after a successful poll.
    pub poll_interval: Duration,
    /// Pause after a failed poll.
    pub retry_backoff: Duration,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            retry_backoff: Duration::from_secs(30),
        }
    }
}

/// Copies the client's last success into the heartbeat on a fixed cadence.
pub struct HeartbeatUpdater<C: MonitoredClient> {
    client: Arc<C>,
    heartbeat: Heartbeat,
    config: UpdaterConfig,
}

impl<C: MonitoredClient> HeartbeatUpdater<C> {
    pub fn new(client: Arc<C>, heartbeat: Heartbeat, config: UpdaterConfig) -> Self {
        Self {
            client,
            heartbeat,
            config,
        }
    }

    /// Poll until `cancel` fires.
    ///
    /// Cancellation is observed at every sleep and right before each write;
    /// a cancelled updater never writes again.
    pub async fn run(self, cancel: CancellationToken) {
        debug!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            retry_backoff_ms = self.config.retry_backoff.as_millis() as u64,
            "Heartbeat updater started"
        );

        while !cancel.is_cancelled() {
            let pause = match self.poll() {
                Ok(last_success) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    self.heartbeat.write_datetime(last_success);
                    trace!(last_success = %iso8601(last_success), "Heartbeat updated");
                    self.config.poll_interval
                }
                Err(e) => {
                    error!(
                        error = %e,
                        retry_in_ms = self.config.retry_backoff.as_millis() as u64,
                        "Unknown error trying to update last success timestamp"
                    );
                    self.config.retry_backoff
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        debug!("Heartbeat updater cancelled");
    }

    /// Ask the client once. A panicking client counts as a failed poll.
    fn poll(&self) -> Result<chrono::DateTime<chrono::Utc>, ClientError> {
        let client = &self.client;
        match panic::catch_unwind(AssertUnwindSafe(|| client.last_success_timestamp())) {
            Ok(result) => result,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(format!("monitored client panicked: {}", message).into())
            }
        }
    }

    /// Spawn the loop on the current Tokio runtime.
    pub fn spawn(self) -> UpdaterHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.run(cancel.clone()));
        UpdaterHandle {
            cancel,
            task: Some(task),
        }
    }
}

/// Handle to a spawned updater. Dropping it cancels the task.
pub struct UpdaterHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl UpdaterHandle {
    /// Request cancellation. The task exits at its current suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns true once the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Cancel and wait for the task to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!("Heartbeat updater panicked: {}", e);
                }
            }
        }
    }
}

impl Drop for UpdaterHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
