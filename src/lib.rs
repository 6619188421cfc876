//! liveness_probe - HTTP liveness endpoint that survives a busy process.
//!
//! A CPU-bound application often cannot answer a health check in time, even
//! though it is making progress. This crate moves the health endpoint into a
//! separate worker process (the `liveness-worker` executable, launched with
//! fork+exec) with its own Tokio runtime, and lets the application report
//! progress through a shared-memory heartbeat.
//!
//! # Features
//!
//! - **Process isolation**: the health server runs in its own process
//! - **Lock-free heartbeat**: one atomic word in a shared memory object
//! - **Failure-tolerant polling**: client errors are logged and retried after a backoff
//! - **Scoped lifecycle**: worker and updater are torn down on every exit path
//! - **Env configuration**: `LIVENESS_*`, `LOG_LEVEL`, `LOG_FORMAT`
//!
//! # Architecture
//!
//! - [`client::MonitoredClient`] - what the application implements
//! - [`updater::HeartbeatUpdater`] - copies the client's last success into the heartbeat
//! - [`heartbeat::Heartbeat`] - the cross-process timestamp cell
//! - [`server::HealthServer`] - `GET /` returning `200 OK` or `418 I'm a teapot`
//! - [`worker::WorkerProcess`] - the process hosting the server
//! - [`coordinator::LivenessProbe`] - starts and stops all of the above
//!
//! Unix only.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use liveness_probe::{LivenessConfig, LivenessProbe, SuccessTracker};
//!
//! let tracker = Arc::new(SuccessTracker::new());
//! let probe = LivenessProbe::new(Arc::clone(&tracker), LivenessConfig::default())?;
//! let guard = probe.start()?;
//! // ... work, calling tracker.mark_success() ...
//! guard.stop().await;
//! ```

pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod health;
pub mod heartbeat;
pub mod logging;
pub mod server;
pub mod updater;
pub mod worker;

// Re-exports for convenience
pub use client::{ClientError, MonitoredClient, SuccessTracker};
pub use config::{Config, LivenessConfig};
pub use coordinator::{LivenessGuard, LivenessProbe, ProbeState};
pub use error::LivenessError;
pub use heartbeat::Heartbeat;
