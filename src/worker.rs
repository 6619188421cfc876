//! Worker process hosting the health server.
//!
//! The worker is the `liveness-worker` executable, launched with fork+exec
//! so it starts from a clean process image: none of the parent's threads,
//! locks or runtime state come along. Between fork and exec the child only
//! clears close-on-exec on the two descriptors it is meant to keep:
//!
//! | Variable | Content |
//! |----------|---------|
//! | `LIVENESS_HEARTBEAT_FD` | shared heartbeat object, mapped again by the worker |
//! | `LIVENESS_CONTROL_FD` | read end of the control pipe |
//! | `LIVENESS_WORKER_ADDR` | address to bind |
//! | `LIVENESS_MAX_DELAY` | staleness threshold |
//! | `LIVENESS_DRAIN_TIMEOUT` | drain time on orderly exit |
//!
//! Teardown is a hard stop: SIGTERM, then SIGKILL if the worker is still
//! there after the grace period. The worker installs no SIGTERM handler, so
//! SIGTERM kills it on the spot. The child is always reaped, either by
//! [`WorkerProcess::terminate`], [`WorkerProcess::shutdown`] or `Drop`.
//!
//! The control pipe covers the parent dying without a teardown: its write
//! end closes with the parent, the worker sees EOF, drains and exits 0.

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, Command, ExitStatus};
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tracing::{debug, error, info, warn};

use crate::config::{env_duration, env_opt, env_parse, format_duration, ConfigError};
use crate::error::LivenessError;
use crate::health::StalenessChecker;
use crate::heartbeat::Heartbeat;
use crate::server::HealthServer;

/// Exit code of a worker that stopped because its parent went away.
pub const EXIT_OK: i32 = 0;
/// Exit code of a worker that could not start or bind.
pub const EXIT_FAILURE: i32 = 1;

pub const ENV_HEARTBEAT_FD: &str = "LIVENESS_HEARTBEAT_FD";
pub const ENV_CONTROL_FD: &str = "LIVENESS_CONTROL_FD";
pub const ENV_WORKER_ADDR: &str = "LIVENESS_WORKER_ADDR";
const ENV_MAX_DELAY: &str = "LIVENESS_MAX_DELAY";
const ENV_DRAIN_TIMEOUT: &str = "LIVENESS_DRAIN_TIMEOUT";

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Everything the worker needs to serve health checks.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub heartbeat: Heartbeat,
    pub max_delay: Duration,
    pub addr: SocketAddr,
    pub drain_timeout: Duration,
}

impl WorkerSettings {
    /// Worker side: rebuild the settings from what the spawner passed down.
    ///
    /// Returns the settings and the control pipe's read end.
    pub fn from_env() -> Result<(Self, OwnedFd), LivenessError> {
        let heartbeat = Heartbeat::from_fd(inherited_fd(ENV_HEARTBEAT_FD)?)?;
        let control = inherited_fd(ENV_CONTROL_FD)?;

        let raw_addr = env_opt(ENV_WORKER_ADDR).ok_or_else(|| ConfigError::Invalid {
            key: ENV_WORKER_ADDR.into(),
            message: "not set".into(),
        })?;
        let addr = raw_addr
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Parse {
                key: ENV_WORKER_ADDR.into(),
                value: raw_addr.clone(),
                error: e.to_string(),
            })?;

        let max_delay = env_duration(ENV_MAX_DELAY, "1h")?
            .filter(|d| !d.is_zero())
            .ok_or_else(|| ConfigError::Invalid {
                key: ENV_MAX_DELAY.into(),
                message: "must be greater than zero".into(),
            })?;
        let drain_timeout = env_duration(ENV_DRAIN_TIMEOUT, "1s")?.unwrap_or(Duration::ZERO);

        Ok((
            Self {
                heartbeat,
                max_delay,
                addr,
                drain_timeout,
            },
            control,
        ))
    }
}

/// Handle to a running health server worker.
#[derive(Debug)]
pub struct WorkerProcess {
    child: Child,
    /// Write end of the control pipe; closing it tells the worker its
    /// parent is gone.
    control: Option<OwnedFd>,
    exit_code: Option<i32>,
}

impl WorkerProcess {
    /// Launch `program` as the health server worker.
    pub fn spawn(program: &Path, settings: &WorkerSettings) -> Result<Self, LivenessError> {
        let (control_rx, control_tx) = control_pipe()?;
        let heartbeat_fd = settings.heartbeat.as_fd().as_raw_fd();
        let control_fd = control_rx.as_raw_fd();

        let mut command = Command::new(program);
        command
            .env(ENV_HEARTBEAT_FD, heartbeat_fd.to_string())
            .env(ENV_CONTROL_FD, control_fd.to_string())
            .env(ENV_WORKER_ADDR, settings.addr.to_string())
            .env(ENV_MAX_DELAY, format!("{}ms", settings.max_delay.as_millis()))
            .env(
                ENV_DRAIN_TIMEOUT,
                format!("{}ms", settings.drain_timeout.as_millis()),
            );

        // SAFETY: the hook runs between fork and exec and only calls fcntl,
        // which is async-signal-safe.
        unsafe {
            command.pre_exec(move || {
                clear_cloexec(heartbeat_fd)?;
                clear_cloexec(control_fd)
            });
        }

        let child = command.spawn().map_err(|error| LivenessError::Spawn {
            program: program.to_path_buf(),
            error,
        })?;
        drop(control_rx);

        debug!(
            pid = child.id(),
            program = %program.display(),
            max_delay = %format_duration(settings.max_delay),
            "Spawned health server worker"
        );

        Ok(Self {
            child,
            control: Some(control_tx),
            exit_code: None,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Exit code if the worker has exited. Signals are reported as 128 + signo.
    pub fn try_wait(&mut self) -> Option<i32> {
        if self.exit_code.is_none() {
            match self.child.try_wait() {
                Ok(Some(status)) => self.exit_code = Some(exit_code(status)),
                Ok(None) => {}
                Err(e) => {
                    debug!(pid = self.pid(), "try_wait failed: {}", e);
                    self.exit_code = Some(EXIT_FAILURE);
                }
            }
        }
        self.exit_code
    }

    pub fn is_running(&mut self) -> bool {
        self.try_wait().is_none()
    }

    /// Close the control pipe, as happens when the parent exits. The worker
    /// stops accepting, drains and exits with [`EXIT_OK`].
    pub fn release_control(&mut self) {
        if self.control.take().is_some() {
            debug!(pid = self.pid(), "Closed health server worker control pipe");
        }
    }

    /// SIGTERM the worker, wait up to `grace`, then SIGKILL and reap.
    ///
    /// Blocks the calling thread for at most `grace` plus the reap.
    pub fn terminate(&mut self, grace: Duration) -> i32 {
        if let Some(code) = self.try_wait() {
            return code;
        }
        self.signal(libc::SIGTERM);

        let deadline = Instant::now() + grace;
        loop {
            if let Some(code) = self.try_wait() {
                return code;
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(REAP_POLL_INTERVAL);
        }

        self.kill_and_reap()
    }

    /// Async form of [`terminate`](Self::terminate) for use inside a runtime.
    pub async fn shutdown(&mut self, grace: Duration) -> i32 {
        if let Some(code) = self.try_wait() {
            return code;
        }
        self.signal(libc::SIGTERM);

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if let Some(code) = self.try_wait() {
                return code;
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(REAP_POLL_INTERVAL).await;
        }

        self.kill_and_reap()
    }

    fn signal(&self, signal: libc::c_int) {
        // SAFETY: the child is not reaped yet, so its pid cannot have been recycled.
        if unsafe { libc::kill(self.child.id() as libc::pid_t, signal) } != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                warn!(pid = self.pid(), signal, "Failed to signal health server worker: {}", err);
            }
        }
    }

    fn kill_and_reap(&mut self) -> i32 {
        if let Some(code) = self.exit_code {
            return code;
        }
        if let Err(e) = self.child.kill() {
            debug!(pid = self.pid(), "kill failed: {}", e);
        }
        let code = match self.child.wait() {
            Ok(status) => exit_code(status),
            Err(e) => {
                debug!(pid = self.pid(), "wait failed: {}", e);
                EXIT_FAILURE
            }
        };
        self.exit_code = Some(code);
        self.control.take();
        if code == 128 + libc::SIGKILL {
            warn!(pid = self.pid(), "Health server worker killed after grace period");
        }
        code
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if self.exit_code.is_none() {
            self.kill_and_reap();
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(EXIT_FAILURE)
}

/// Create the control pipe as (read end, write end), both close-on-exec.
fn control_pipe() -> Result<(OwnedFd, OwnedFd), LivenessError> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: fds is a valid two-element buffer.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(LivenessError::Io(io::Error::last_os_error()));
    }
    // SAFETY: both fds were just returned by pipe() and are owned by nobody else.
    let (rx, tx) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    for fd in [&rx, &tx] {
        set_cloexec(fd.as_raw_fd())?;
    }
    Ok((rx, tx))
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor the caller keeps open.
    if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Async-signal-safe: runs in the forked child before exec.
fn clear_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor inherited from the parent.
    if unsafe { libc::fcntl(fd, libc::F_SETFD, 0) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Take ownership of a descriptor whose number the spawner put in `key`.
fn inherited_fd(key: &str) -> Result<OwnedFd, LivenessError> {
    let fd: RawFd = env_parse(key, -1)?;
    if fd < 0 {
        return Err(ConfigError::Invalid {
            key: key.into(),
            message: "not set".into(),
        }
        .into());
    }
    // SAFETY: F_GETFD only inspects the descriptor table.
    if unsafe { libc::fcntl(fd, libc::F_GETFD) } == -1 {
        return Err(LivenessError::Io(io::Error::last_os_error()));
    }
    set_cloexec(fd)?;
    // SAFETY: the spawner handed this descriptor to us; nothing else in
    // this process refers to it.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Worker entry point: serve health checks until the control pipe closes.
///
/// Returns the process exit code.
pub fn run_worker(settings: WorkerSettings, control: OwnedFd) -> i32 {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build health server runtime: {}", e);
            return EXIT_FAILURE;
        }
    };
    runtime.block_on(serve_until_parent_exits(settings, control))
}

async fn serve_until_parent_exits(settings: WorkerSettings, control: OwnedFd) -> i32 {
    let checker = StalenessChecker::new(settings.heartbeat, settings.max_delay);
    let server = match HealthServer::bind(settings.addr, checker) {
        Ok(server) => server.with_drain_timeout(settings.drain_timeout),
        Err(e) => {
            error!("{}", e);
            return EXIT_FAILURE;
        }
    };

    let mut control = match pipe::Receiver::from_owned_fd(control) {
        Ok(rx) => rx,
        Err(e) => {
            error!("Failed to watch control pipe: {}", e);
            return EXIT_FAILURE;
        }
    };

    info!(pid = std::process::id(), "Health server worker started");

    server
        .serve(async move {
            let mut buf = [0u8; 16];
            // Nothing is ever written; any return means the parent closed its end.
            loop {
                match control.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        })
        .await;

    info!("Parent went away, health server worker exiting");
    EXIT_OK
}
