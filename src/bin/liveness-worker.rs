//! Health server worker executable.
//!
//! Launched by `LivenessProbe::start`; not meant to be run by hand. It
//! serves `GET /` from the heartbeat object it inherits and exits when its
//! parent goes away or kills it.

use std::process::ExitCode;

use tracing::error;

use liveness_probe::config::LoggingConfig;
use liveness_probe::worker::{self, WorkerSettings, EXIT_FAILURE};

fn main() -> ExitCode {
    match LoggingConfig::from_env() {
        Ok(config) => {
            if let Err(e) = liveness_probe::logging::init(&config) {
                eprintln!("liveness-worker: failed to initialize logging: {}", e);
            }
        }
        Err(e) => eprintln!("liveness-worker: invalid logging configuration: {}", e),
    }

    let (settings, control) = match WorkerSettings::from_env() {
        Ok(inherited) => inherited,
        Err(e) => {
            error!("Health server worker cannot start: {}", e);
            return ExitCode::from(EXIT_FAILURE as u8);
        }
    };

    ExitCode::from(worker::run_worker(settings, control) as u8)
}
