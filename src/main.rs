//! Demo binary: a synthetic workload wrapped in a liveness probe.
//!
//! Every `DEMO_WORK_INTERVAL` (default 10s) it burns some CPU and records a
//! success. Point a browser or `curl` at the liveness port to watch the
//! heartbeat move.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use liveness_probe::config::{parse_duration, Config};
use liveness_probe::{LivenessProbe, SuccessTracker};

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::from_env()?;

    liveness_probe::logging::init(&config.logging)?;
    config.log_summary();

    let work_interval = match std::env::var("DEMO_WORK_INTERVAL") {
        Ok(raw) => parse_duration(&raw)?.unwrap_or(Duration::from_secs(10)),
        Err(_) => Duration::from_secs(10),
    };

    // Single-threaded on purpose: the workload and the updater share one
    // scheduler, which is exactly the situation the worker process is for.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(config, work_interval))
}

async fn async_main(
    config: Config,
    work_interval: Duration,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let tracker = Arc::new(SuccessTracker::new());
    let probe = LivenessProbe::new(Arc::clone(&tracker), config.liveness)?;

    info!(
        "Starting demo workload (liveness on port {})",
        probe.liveness_port()
    );

    probe
        .scoped(|| async {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(work_interval) => {
                        let spent = busy_work(Duration::from_millis(500));
                        tracker.mark_success();
                        info!(busy_ms = spent.as_millis() as u64, "Work unit done");
                    }
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            warn!("Failed to listen for ctrl-c: {}", e);
                        }
                        info!("Shutting down...");
                        break;
                    }
                }
            }
        })
        .await?;

    Ok(())
}

/// Spin the CPU for roughly `budget`, blocking the scheduler.
fn busy_work(budget: Duration) -> Duration {
    let start = Instant::now();
    let mut acc: u64 = 0;
    while start.elapsed() < budget {
        for i in 0..10_000u64 {
            acc = acc.wrapping_mul(6364136223846793005).wrapping_add(i);
        }
        std::hint::black_box(acc);
    }
    start.elapsed()
}
