//! Liveness probe lifecycle.
//!
//! [`LivenessProbe`] ties the pieces together:
//!
//! ```text
//!  MonitoredClient ──poll──► HeartbeatUpdater ──write──► Heartbeat
//!                            (parent task)                  │ shared page
//!                                                            ▼
//!  HTTP client ◄──200/418── HealthServer ◄──read──────── Heartbeat
//!                           (worker process)
//! ```
//!
//! A probe goes `Created -> Started -> Stopped` exactly once. Starting hands
//! back a [`LivenessGuard`]; the worker and the updater live exactly as long
//! as the guard. Teardown is a hard stop on every path: the worker gets
//! SIGTERM, and SIGKILL if it is still there after `terminate_grace`, and
//! is then reaped. [`LivenessGuard::stop`] also waits for the updater to
//! finish; dropping the guard (including during a panic unwind) kills the
//! worker at once and only cancels the updater.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use liveness_probe::{LivenessConfig, LivenessProbe, SuccessTracker};
//!
//! let tracker = Arc::new(SuccessTracker::new());
//! let probe = LivenessProbe::new(Arc::clone(&tracker), LivenessConfig::default())?;
//!
//! probe
//!     .scoped(|| async {
//!         loop {
//!             do_work().await;
//!             tracker.mark_success();
//!         }
//!     })
//!     .await?;
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::client::MonitoredClient;
use crate::config::LivenessConfig;
use crate::error::LivenessError;
use crate::heartbeat::Heartbeat;
use crate::updater::{HeartbeatUpdater, UpdaterHandle};
use crate::worker::{WorkerProcess, WorkerSettings};

const STATE_CREATED: u8 = 0;
const STATE_STARTED: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Lifecycle state of a [`LivenessProbe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Created,
    Started,
    Stopped,
}

impl ProbeState {
    fn from_u8(value: u8) -> Self {
        match value {
            STATE_CREATED => Self::Created,
            STATE_STARTED => Self::Started,
            _ => Self::Stopped,
        }
    }
}

impl std::fmt::Display for ProbeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Started => write!(f, "started"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Liveness probe for one monitored client.
pub struct LivenessProbe<C: MonitoredClient> {
    client: Arc<C>,
    config: LivenessConfig,
    heartbeat: Heartbeat,
    state: Arc<AtomicU8>,
}

impl<C: MonitoredClient> LivenessProbe<C> {
    /// Create a probe. The heartbeat starts at the current time so the
    /// endpoint reports healthy before the first poll lands.
    pub fn new(client: Arc<C>, config: LivenessConfig) -> Result<Self, LivenessError> {
        config.validate()?;
        let heartbeat = Heartbeat::now()?;

        Ok(Self {
            client,
            config,
            heartbeat,
            state: Arc::new(AtomicU8::new(STATE_CREATED)),
        })
    }

    /// Create a probe configured from `LIVENESS_*` environment variables.
    pub fn from_env(client: Arc<C>) -> Result<Self, LivenessError> {
        Self::new(client, LivenessConfig::from_env()?)
    }

    /// Launch the health server worker and spawn the heartbeat updater.
    ///
    /// Must be called from within a Tokio runtime. Only valid once.
    pub fn start(&self) -> Result<LivenessGuard, LivenessError> {
        self.state
            .compare_exchange(
                STATE_CREATED,
                STATE_STARTED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|actual| LivenessError::InvalidState {
                expected: ProbeState::Created,
                actual: ProbeState::from_u8(actual),
            })?;

        let settings = WorkerSettings {
            heartbeat: self.heartbeat.clone(),
            max_delay: self.config.max_delay,
            addr: self.config.bind_addr(),
            drain_timeout: self.config.drain_timeout,
        };
        let worker = match WorkerProcess::spawn(&self.config.worker_program(), &settings) {
            Ok(worker) => worker,
            Err(e) => {
                self.state.store(STATE_STOPPED, Ordering::Release);
                return Err(e);
            }
        };

        let updater = HeartbeatUpdater::new(
            Arc::clone(&self.client),
            self.heartbeat.clone(),
            self.config.updater(),
        )
        .spawn();

        info!(
            port = self.config.port,
            worker_pid = worker.pid(),
            "Liveness probe started"
        );

        Ok(LivenessGuard {
            worker: Some(worker),
            updater: Some(updater),
            state: Arc::clone(&self.state),
            terminate_grace: self.config.terminate_grace,
        })
    }

    /// Run `f` with the probe started, then stop it.
    ///
    /// The probe is torn down whether `f` completes, panics, or its future
    /// is dropped.
    pub async fn scoped<F, Fut, T>(&self, f: F) -> Result<T, LivenessError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.start()?;
        let output = f().await;
        guard.stop().await;
        Ok(output)
    }

    /// Last heartbeat written by the updater.
    pub fn last_success(&self) -> DateTime<Utc> {
        self.heartbeat.last_success()
    }

    /// Port the health server binds.
    pub fn liveness_port(&self) -> u16 {
        self.config.port
    }

    pub fn max_delay(&self) -> Duration {
        self.config.max_delay
    }

    pub fn state(&self) -> ProbeState {
        ProbeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Shared heartbeat cell.
    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }
}

/// Keeps the health server worker and the heartbeat updater running.
#[must_use = "dropping the guard stops the liveness probe immediately"]
pub struct LivenessGuard {
    worker: Option<WorkerProcess>,
    updater: Option<UpdaterHandle>,
    state: Arc<AtomicU8>,
    terminate_grace: Duration,
}

impl LivenessGuard {
    /// PID of the health server worker.
    pub fn worker_pid(&self) -> Option<u32> {
        self.worker.as_ref().map(WorkerProcess::pid)
    }

    /// Returns true while the worker process has not exited.
    pub fn is_worker_running(&mut self) -> bool {
        self.worker.as_mut().is_some_and(WorkerProcess::is_running)
    }

    /// Returns true once the updater task has exited.
    pub fn is_updater_finished(&self) -> bool {
        self.updater.as_ref().map_or(true, UpdaterHandle::is_finished)
    }

    /// Terminate the worker and stop the updater, waiting for both.
    pub async fn stop(mut self) {
        if let Some(mut worker) = self.worker.take() {
            let code = worker.shutdown(self.terminate_grace).await;
            debug!(pid = worker.pid(), code, "Health server worker exited");
        }
        if let Some(updater) = self.updater.take() {
            updater.stop().await;
        }
        self.state.store(STATE_STOPPED, Ordering::Release);
        info!("Liveness probe stopped");
    }
}

impl Drop for LivenessGuard {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.terminate(Duration::ZERO);
        }
        if let Some(updater) = self.updater.take() {
            updater.cancel();
        }
        self.state.store(STATE_STOPPED, Ordering::Release);
    }
}
