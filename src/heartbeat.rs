//! Cross-process heartbeat cell.
//!
//! The heartbeat is a single UNIX timestamp (seconds, UTC, as `f64`) kept as
//! raw bits in an `AtomicU64`. The atomic lives in a shared memory object
//! (a memfd on Linux) mapped with `MAP_SHARED`. The descriptor is handed to
//! the worker process, which maps the same object, so both sides see the
//! same word. One writer (the updater) and any number of readers (health
//! requests) need no lock: a reader gets either the old or the new value,
//! never a torn one.
//!
//! ```text
//!  parent process                     worker process
//!  ┌──────────────────┐               ┌──────────────────┐
//!  │ HeartbeatUpdater │── write ─┐    │   HealthServer   │
//!  └──────────────────┘          ▼    └────────┬─────────┘
//!                        ┌───────────────┐     │
//!                        │ shared object │◄────┘ read
//!                        │ AtomicU64     │
//!                        └───────────────┘
//! ```

use std::fs::File;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

use crate::error::LivenessError;

const CELL_LEN: usize = std::mem::size_of::<AtomicU64>();

/// Create an anonymous shared memory object sized for one cell.
///
/// The descriptor is close-on-exec; the worker spawner clears the flag on
/// its own copy.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn create_shared_object() -> io::Result<OwnedFd> {
    use std::os::fd::FromRawFd;

    let name = b"liveness-heartbeat\0";
    // SAFETY: name is NUL-terminated and outlives the call.
    let fd = unsafe { libc::memfd_create(name.as_ptr().cast(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd was just returned by memfd_create and is owned by nobody else.
    let file = File::from(unsafe { OwnedFd::from_raw_fd(fd) });
    file.set_len(CELL_LEN as u64)?;
    Ok(file.into())
}

/// Create an anonymous shared memory object sized for one cell.
///
/// Unlinked temp file; std opens it close-on-exec.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn create_shared_object() -> io::Result<OwnedFd> {
    use std::sync::atomic::AtomicUsize;

    static SEQ: AtomicUsize = AtomicUsize::new(0);
    let path = std::env::temp_dir().join(format!(
        "liveness-heartbeat-{}-{}",
        std::process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(&path)?;
    std::fs::remove_file(&path)?;
    file.set_len(CELL_LEN as u64)?;
    Ok(file.into())
}

/// Owner of the mapping and of the object's descriptor. Unmapped when the
/// last handle in this process drops.
struct SharedCell {
    ptr: *mut AtomicU64,
    fd: OwnedFd,
}

// The pointer targets an AtomicU64 in a mapping that stays valid until Drop.
unsafe impl Send for SharedCell {}
unsafe impl Sync for SharedCell {}

impl SharedCell {
    fn map(fd: OwnedFd) -> io::Result<Self> {
        let file = File::from(fd);
        if file.metadata()?.len() < CELL_LEN as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "heartbeat object is smaller than one cell",
            ));
        }
        let fd = OwnedFd::from(file);

        // SAFETY: fd refers to an object of at least CELL_LEN bytes. The
        // kernel returns a page-aligned region, which is a valid AtomicU64.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                CELL_LEN,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            ptr: addr as *mut AtomicU64,
            fd,
        })
    }

    #[inline]
    fn atomic(&self) -> &AtomicU64 {
        // SAFETY: ptr is non-null, aligned and mapped for the lifetime of self.
        unsafe { &*self.ptr }
    }
}

impl Drop for SharedCell {
    fn drop(&mut self) {
        // SAFETY: ptr comes from the successful mmap in `map`.
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, CELL_LEN);
        }
    }
}

/// Handle to the shared heartbeat timestamp.
///
/// Cloning is cheap and every clone refers to the same cell.
#[derive(Clone)]
pub struct Heartbeat {
    cell: Arc<SharedCell>,
}

impl Heartbeat {
    /// Create a new heartbeat object holding `initial`.
    pub fn new(initial: f64) -> Result<Self, LivenessError> {
        let fd = create_shared_object().map_err(LivenessError::SharedMemory)?;
        let heartbeat = Self::from_fd(fd)?;
        heartbeat.write(initial);
        Ok(heartbeat)
    }

    /// Create a new heartbeat object holding the current wall-clock time.
    pub fn now() -> Result<Self, LivenessError> {
        Self::new(unix_now())
    }

    /// Map an existing heartbeat object, typically one inherited from the
    /// process that created it. The stored value is left as is.
    pub fn from_fd(fd: OwnedFd) -> Result<Self, LivenessError> {
        let cell = SharedCell::map(fd).map_err(LivenessError::SharedMemory)?;
        Ok(Self {
            cell: Arc::new(cell),
        })
    }

    /// Store a UNIX timestamp in seconds.
    #[inline]
    pub fn write(&self, timestamp: f64) {
        self.cell
            .atomic()
            .store(timestamp.to_bits(), Ordering::Release);
    }

    /// Latest stored UNIX timestamp in seconds.
    #[inline]
    pub fn read(&self) -> f64 {
        f64::from_bits(self.cell.atomic().load(Ordering::Acquire))
    }

    pub fn write_datetime(&self, at: DateTime<Utc>) {
        self.write(from_datetime(at));
    }

    /// Latest stored timestamp as a UTC datetime.
    pub fn last_success(&self) -> DateTime<Utc> {
        to_datetime(self.read())
    }
}

impl AsFd for Heartbeat {
    /// Descriptor of the shared object, for passing to another process.
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.cell.fd.as_fd()
    }
}

impl std::fmt::Debug for Heartbeat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heartbeat")
            .field("value", &self.read())
            .field("fd", &self.cell.fd.as_raw_fd())
            .finish()
    }
}

/// Current wall-clock time as UNIX seconds.
pub fn unix_now() -> f64 {
    from_datetime(Utc::now())
}

/// Convert UNIX seconds to a UTC datetime, rounded to microseconds.
///
/// Non-finite or out-of-range values map to the UNIX epoch.
pub fn to_datetime(timestamp: f64) -> DateTime<Utc> {
    if !timestamp.is_finite() {
        return DateTime::<Utc>::default();
    }
    let micros = (timestamp * 1_000_000.0).round() as i64;
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    Utc.timestamp_opt(secs, nanos).single().unwrap_or_default()
}

/// Convert a UTC datetime to UNIX seconds (microsecond resolution).
pub fn from_datetime(at: DateTime<Utc>) -> f64 {
    at.timestamp() as f64 + f64::from(at.timestamp_subsec_micros()) / 1_000_000.0
}

/// ISO-8601 rendering used in the `Last-Success` header.
///
/// `2024-05-01T12:30:00+00:00`, or with a microsecond fraction when the
/// timestamp has one: `2024-05-01T12:30:00.250000+00:00`.
pub fn iso8601(at: DateTime<Utc>) -> String {
    let format = if at.timestamp_subsec_micros() == 0 {
        SecondsFormat::Secs
    } else {
        SecondsFormat::Micros
    };
    at.to_rfc3339_opts(format, false)
}
