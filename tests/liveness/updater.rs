//! Heartbeat updater behaviour seen through the health endpoint.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use liveness_probe::heartbeat::{from_datetime, iso8601};
use liveness_probe::{ClientError, LivenessProbe, MonitoredClient};
use reqwest::StatusCode;

use crate::helpers::*;

/// Fails on the first call, then always reports `at`.
struct FailOnceClient {
    calls: AtomicUsize,
    at: DateTime<Utc>,
}

impl FailOnceClient {
    fn new(at: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            at,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MonitoredClient for FailOnceClient {
    fn last_success_timestamp(&self) -> Result<DateTime<Utc>, ClientError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err("metrics backend unavailable".into())
        } else {
            Ok(self.at)
        }
    }
}

/// Always reports the same fixed time.
struct FixedClient(DateTime<Utc>);

impl MonitoredClient for FixedClient {
    fn last_success_timestamp(&self) -> Result<DateTime<Utc>, ClientError> {
        Ok(self.0)
    }
}

/// Whole seconds, so the expected header has no fraction.
fn seconds_ago(secs: i64) -> DateTime<Utc> {
    (Utc::now() - TimeDelta::seconds(secs))
        .with_nanosecond(0)
        .unwrap()
}

async fn wait_for_heartbeat<C: MonitoredClient>(probe: &LivenessProbe<C>, at: DateTime<Utc>) {
    let expected = from_datetime(at);
    let start = Instant::now();
    while probe.heartbeat().read() != expected {
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "heartbeat never reached {}",
            iso8601(at)
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_recovers_after_client_error() {
    let port = free_port();
    let at = seconds_ago(5);
    let client = FailOnceClient::new(at);
    let config = probe_config(port)
        .with_poll_interval(Duration::from_millis(100))
        .with_retry_backoff(Duration::from_millis(300));
    let probe = LivenessProbe::new(Arc::clone(&client), config).unwrap();
    let endpoint = Endpoint::new(port);

    let guard = probe.start().unwrap();
    wait_for_heartbeat(&probe, at).await;
    assert!(client.calls() >= 2);

    endpoint.wait_until_reachable(Duration::from_secs(5)).await;
    let resp = endpoint.get().await;
    assert_status(&resp, StatusCode::OK);
    assert_eq!(last_success_header(&resp), iso8601(at));

    guard.stop().await;
}

#[tokio::test]
async fn test_stale_client_reports_teapot() {
    let port = free_port();
    let at = seconds_ago(120);
    let config = probe_config(port).with_poll_interval(Duration::from_millis(100));
    let probe = LivenessProbe::new(Arc::new(FixedClient(at)), config).unwrap();
    let endpoint = Endpoint::new(port);

    let guard = probe.start().unwrap();
    wait_for_heartbeat(&probe, at).await;

    endpoint.wait_until_reachable(Duration::from_secs(5)).await;
    let resp = endpoint.get().await;
    assert_status(&resp, StatusCode::IM_A_TEAPOT);
    assert_eq!(last_success_header(&resp), iso8601(at));
    assert_eq!(probe.last_success(), at);

    guard.stop().await;
}
