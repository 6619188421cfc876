//! Staleness check behind the liveness endpoint.
//!
//! The process is reported alive while its heartbeat is younger than the
//! configured max delay. An orchestrator probe pointed at the worker port
//! sees `200 OK` or `418 I'm a teapot`:
//!
//! ```yaml
//! livenessProbe:
//!   httpGet:
//!     path: /
//!     port: 8511
//!   periodSeconds: 30
//! ```

mod checker;
mod status;

pub use checker::StalenessChecker;
pub use status::{HealthVerdict, LivenessStatus};
