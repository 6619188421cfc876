//! Test helpers and utilities

use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::path::Path;
use std::time::{Duration, Instant};

use liveness_probe::LivenessConfig;
use reqwest::{Client, Response, StatusCode};

/// HTTP client for one health endpoint.
pub struct Endpoint {
    pub url: String,
    pub client: Client,
}

#[allow(dead_code)]
impl Endpoint {
    pub fn new(port: u16) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            url: format!("http://127.0.0.1:{}/", port),
            client,
        }
    }

    /// GET the health route.
    pub async fn get(&self) -> Response {
        self.client
            .get(&self.url)
            .send()
            .await
            .expect("GET request failed")
    }

    /// GET an arbitrary path on the health server.
    pub async fn get_path(&self, path: &str) -> Response {
        self.client
            .get(format!("{}{}", self.url, path.trim_start_matches('/')))
            .send()
            .await
            .expect("GET request failed")
    }

    /// Check if anything answers on the endpoint.
    pub async fn is_reachable(&self) -> bool {
        self.client
            .get(&self.url)
            .timeout(Duration::from_millis(500))
            .send()
            .await
            .is_ok()
    }

    /// Wait for the worker to bind.
    pub async fn wait_until_reachable(&self, timeout: Duration) {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if self.is_reachable().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("Health endpoint {} not reachable after {:?}", self.url, timeout);
    }
}

/// Pick a port nothing is listening on.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

/// The worker executable cargo built for this test run.
pub fn worker_bin() -> &'static Path {
    Path::new(env!("CARGO_BIN_EXE_liveness-worker"))
}

/// Loopback liveness config with test-friendly timings.
pub fn probe_config(port: u16) -> LivenessConfig {
    LivenessConfig::default()
        .with_worker_bin(worker_bin())
        .with_bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .with_port(port)
        .with_max_delay(Duration::from_secs(60))
        .with_terminate_grace(Duration::from_millis(200))
        .with_drain_timeout(Duration::from_millis(100))
}

/// `Last-Success` header value.
pub fn last_success_header(response: &Response) -> String {
    response
        .headers()
        .get("Last-Success")
        .expect("Last-Success header missing")
        .to_str()
        .expect("Last-Success header not ASCII")
        .to_string()
}

/// Assert that response has expected status
pub fn assert_status(response: &Response, expected: StatusCode) {
    assert_eq!(
        response.status(),
        expected,
        "Expected status {}, got {}",
        expected,
        response.status()
    );
}

/// Blocking `GET /` over a plain socket, usable from a thread while the
/// test runtime is busy. Returns the HTTP status code.
pub fn blocking_get_status(port: u16, timeout: Duration) -> std::io::Result<u16> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let mut stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    stream.write_all(b"GET / HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n")?;

    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    response
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed status line")
        })
}
