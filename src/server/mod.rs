//! HTTP health server.
//!
//! Serves the single liveness route (see [`routing`]) from whatever process
//! it runs in. In production that is the worker process (see
//! [`crate::worker`]), which gives the endpoint its own scheduler so a
//! CPU-bound parent cannot starve it. It can also be run as a task in the
//! caller's runtime, which is handy in tests but loses that isolation.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use liveness_probe::health::StalenessChecker;
//! use liveness_probe::heartbeat::Heartbeat;
//! use liveness_probe::server::HealthServer;
//!
//! let checker = StalenessChecker::new(Heartbeat::now()?, Duration::from_secs(60));
//! let server = HealthServer::bind("127.0.0.1:8511".parse()?, checker)?;
//! server.serve(tokio::signal::ctrl_c()).await;
//! ```

pub mod routing;

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::LivenessError;
use crate::health::StalenessChecker;

pub use routing::LAST_SUCCESS_HEADER;

/// Health server bound to its listener.
pub struct HealthServer {
    listener: TcpListener,
    checker: Arc<StalenessChecker>,
    drain_timeout: Duration,
}

impl HealthServer {
    /// Bind the listener.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(addr: SocketAddr, checker: StalenessChecker) -> Result<Self, LivenessError> {
        let std_listener =
            Self::create_listener(addr).map_err(|error| LivenessError::Bind { addr, error })?;
        let listener = TcpListener::from_std(std_listener)?;

        Ok(Self {
            listener,
            checker: Arc::new(checker),
            drain_timeout: Duration::from_secs(1),
        })
    }

    /// Set how long in-flight requests may run after shutdown is requested.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Creates a socket with SO_REUSEADDR so a restarted worker can rebind
    /// while old connections sit in TIME_WAIT.
    fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
        let domain = if addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(128)?;

        Ok(socket.into())
    }

    /// Serve until `shutdown` resolves, then stop accepting and drain.
    pub async fn serve<F>(self, shutdown: F)
    where
        F: Future,
    {
        let Self {
            listener,
            checker,
            drain_timeout,
        } = self;

        if let Ok(addr) = listener.local_addr() {
            info!("Health server listening on http://{}", addr);
        }

        let graceful = GracefulShutdown::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, remote_addr) = match result {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!("Health server accept error: {}", e);
                            continue;
                        }
                    };

                    let _ = stream.set_nodelay(true);
                    let checker = Arc::clone(&checker);
                    let service = service_fn(move |req| {
                        let checker = Arc::clone(&checker);
                        async move { routing::handle_request(req, &checker).await }
                    });

                    let conn = http1::Builder::new()
                        .title_case_headers(true)
                        .serve_connection(TokioIo::new(stream), service);
                    let conn = graceful.watch(conn);

                    tokio::spawn(async move {
                        if let Err(e) = conn.await {
                            debug!("Health connection {} ended with error: {}", remote_addr, e);
                        }
                    });
                }
                _ = &mut shutdown => {
                    debug!("Health server received shutdown signal, stopping accept loop");
                    break;
                }
            }
        }

        drop(listener);

        tokio::select! {
            _ = graceful.shutdown() => {
                debug!("Health server connections drained");
            }
            _ = tokio::time::sleep(drain_timeout) => {
                warn!("Drain timeout reached with health connections still open");
            }
        }

        info!("Health server stopped");
    }
}
