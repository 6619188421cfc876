//! Coordinator lifecycle tests against a real health server worker process.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeDelta, Utc};
use liveness_probe::heartbeat::iso8601;
use liveness_probe::{LivenessProbe, ProbeState, SuccessTracker};
use reqwest::StatusCode;

use crate::helpers::*;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

fn probe_on_free_port() -> (LivenessProbe<SuccessTracker>, Arc<SuccessTracker>, Endpoint) {
    let port = free_port();
    let tracker = Arc::new(SuccessTracker::new());
    let probe = LivenessProbe::new(Arc::clone(&tracker), probe_config(port)).unwrap();
    (probe, tracker, Endpoint::new(port))
}

/// Wait until `cond` holds, polling every 20ms.
async fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

#[tokio::test]
async fn test_fresh_start_reports_ok() {
    let (probe, tracker, endpoint) = probe_on_free_port();
    assert_eq!(probe.state(), ProbeState::Created);

    let guard = probe.start().unwrap();
    assert_eq!(probe.state(), ProbeState::Started);
    endpoint.wait_until_reachable(STARTUP_TIMEOUT).await;

    let resp = endpoint.get().await;
    assert_status(&resp, StatusCode::OK);
    assert_eq!(last_success_header(&resp), iso8601(tracker.last_success()));
    assert_eq!(resp.text().await.unwrap(), "OK");

    guard.stop().await;
}

#[tokio::test]
async fn test_stale_heartbeat_reports_teapot() {
    let port = free_port();
    let tracker = Arc::new(SuccessTracker::new());
    let config = probe_config(port).with_poll_interval(Duration::from_secs(60));
    let probe = LivenessProbe::new(Arc::clone(&tracker), config).unwrap();
    let endpoint = Endpoint::new(port);

    let guard = probe.start().unwrap();
    endpoint.wait_until_reachable(STARTUP_TIMEOUT).await;
    assert_status(&endpoint.get().await, StatusCode::OK);

    // The updater has done its first poll and sleeps for a minute.
    let heartbeat = probe.heartbeat();
    heartbeat.write(heartbeat.read() - 61.0);

    let resp = endpoint.get().await;
    assert_status(&resp, StatusCode::IM_A_TEAPOT);
    assert_eq!(last_success_header(&resp), iso8601(probe.last_success()));
    assert_eq!(resp.text().await.unwrap(), "I'm a teapot");

    guard.stop().await;
}

#[tokio::test]
async fn test_stop_tears_everything_down() {
    let port = free_port();
    let tracker = Arc::new(SuccessTracker::new());
    let config = probe_config(port).with_poll_interval(Duration::from_millis(50));
    let probe = LivenessProbe::new(Arc::clone(&tracker), config).unwrap();
    let endpoint = Endpoint::new(port);

    let mut guard = probe.start().unwrap();
    endpoint.wait_until_reachable(STARTUP_TIMEOUT).await;
    assert!(guard.is_worker_running());
    assert!(guard.worker_pid().is_some());

    let started = Instant::now();
    guard.stop().await;
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(probe.state(), ProbeState::Stopped);
    assert!(!endpoint.is_reachable().await);

    // No updater left to copy new successes into the heartbeat.
    let frozen = probe.heartbeat().read();
    tracker.mark_success_at(Utc::now() + TimeDelta::seconds(30));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(probe.heartbeat().read(), frozen);
}

#[tokio::test]
async fn test_dropping_guard_stops_worker() {
    let (probe, _tracker, endpoint) = probe_on_free_port();

    let guard = probe.start().unwrap();
    endpoint.wait_until_reachable(STARTUP_TIMEOUT).await;

    drop(guard);

    assert_eq!(probe.state(), ProbeState::Stopped);
    assert!(!endpoint.is_reachable().await);
}

#[tokio::test]
async fn test_panic_while_started_stops_worker() {
    let port = free_port();
    let tracker = Arc::new(SuccessTracker::new());
    let probe = Arc::new(LivenessProbe::new(tracker, probe_config(port)).unwrap());
    let endpoint = Endpoint::new(port);

    let task_probe = Arc::clone(&probe);
    let task = tokio::spawn(async move {
        let _guard = task_probe.start().unwrap();
        Endpoint::new(port)
            .wait_until_reachable(STARTUP_TIMEOUT)
            .await;
        panic!("work loop failed");
    });

    let err = task.await.unwrap_err();
    assert!(err.is_panic());

    assert_eq!(probe.state(), ProbeState::Stopped);
    assert!(!endpoint.is_reachable().await);
}

#[tokio::test]
async fn test_scoped_runs_body_and_stops() {
    let (probe, _tracker, endpoint) = probe_on_free_port();

    let status = probe
        .scoped(|| async {
            endpoint.wait_until_reachable(STARTUP_TIMEOUT).await;
            endpoint.get().await.status()
        })
        .await
        .unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(probe.state(), ProbeState::Stopped);
    assert!(!endpoint.is_reachable().await);
}

#[tokio::test]
async fn test_start_twice_is_invalid_state() {
    let (probe, _tracker, _endpoint) = probe_on_free_port();

    let guard = probe.start().unwrap();
    let err = probe.start().err().unwrap();
    assert!(err.is_invalid_state());

    guard.stop().await;

    let err = probe.start().err().unwrap();
    assert!(err.is_invalid_state());
    assert_eq!(probe.state(), ProbeState::Stopped);
}

#[tokio::test]
async fn test_occupied_port_worker_exits() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();
    let tracker = Arc::new(SuccessTracker::new());
    let probe = LivenessProbe::new(tracker, probe_config(port)).unwrap();

    let mut guard = probe.start().unwrap();
    assert!(eventually(STARTUP_TIMEOUT, || !guard.is_worker_running()).await);

    // Parent side keeps running; stop still succeeds.
    guard.stop().await;
    assert_eq!(probe.state(), ProbeState::Stopped);
    drop(occupied);
}

#[tokio::test]
async fn test_queries() {
    let port = free_port();
    let at = Utc::now() - TimeDelta::seconds(5);
    let tracker = Arc::new(SuccessTracker::starting_at(at));
    let probe = LivenessProbe::new(Arc::clone(&tracker), probe_config(port)).unwrap();

    assert_eq!(probe.liveness_port(), port);
    assert_eq!(probe.max_delay(), Duration::from_secs(60));

    let guard = probe.start().unwrap();
    let expected = tracker.last_success();
    assert!(eventually(STARTUP_TIMEOUT, || probe.last_success() == expected).await);

    guard.stop().await;
}

#[test]
fn test_default_port_and_max_delay() {
    let probe = LivenessProbe::new(
        Arc::new(SuccessTracker::new()),
        liveness_probe::LivenessConfig::default(),
    )
    .unwrap();

    assert_eq!(probe.liveness_port(), 8511);
    assert_eq!(probe.max_delay(), Duration::from_secs(3600));
    assert_eq!(probe.state(), ProbeState::Created);
}

/// The endpoint keeps answering while the parent's only scheduler thread
/// is stuck in CPU-bound work.
#[tokio::test]
async fn test_endpoint_answers_while_parent_is_blocked() {
    let (probe, _tracker, endpoint) = probe_on_free_port();
    let port = probe.liveness_port();
    let guard = probe.start().unwrap();
    endpoint.wait_until_reachable(STARTUP_TIMEOUT).await;

    let busy_until = Instant::now() + Duration::from_secs(2);
    let checker = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        let sent = Instant::now();
        let status = blocking_get_status(port, Duration::from_secs(1)).ok();
        (status, sent.elapsed(), Instant::now())
    });

    // Nothing else on this runtime runs until the loop ends.
    while Instant::now() < busy_until {
        std::hint::spin_loop();
    }

    let (status, latency, answered_at) = checker.join().unwrap();
    assert_eq!(status, Some(200));
    assert!(latency < Duration::from_secs(1), "latency {:?}", latency);
    assert!(answered_at < busy_until);

    guard.stop().await;
}

/// Teardown does not wait for the worker to drain: with a connection
/// stuck mid-request and long drain and grace periods, stop still returns
/// at once.
#[tokio::test]
async fn test_stop_is_a_hard_terminate() {
    let port = free_port();
    let config = probe_config(port)
        .with_terminate_grace(Duration::from_secs(10))
        .with_drain_timeout(Duration::from_secs(10));
    let probe = LivenessProbe::new(Arc::new(SuccessTracker::new()), config).unwrap();
    let endpoint = Endpoint::new(port);

    let guard = probe.start().unwrap();
    endpoint.wait_until_reachable(STARTUP_TIMEOUT).await;

    let mut stalled = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
    std::io::Write::write_all(&mut stalled, b"GET / HTTP/1.1\r\n").unwrap();

    let started = Instant::now();
    guard.stop().await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!endpoint.is_reachable().await);
}
