//! Apache-style access logger (spec §3/§6, C3).
//!
//! Grounded on `original_source/src/logger.c`'s write path: append-mode file,
//! a single lock serializing writes, an immediate flush after every line,
//! and a size-threshold rotation check performed *before* the next write is
//! accepted — so a line is never split across the rotation boundary. The
//! original's periodic flush thread and in-memory ring buffer are not
//! carried forward: this logger flushes synchronously on every call, which
//! makes the buffering thread redundant.
//!
//! The file itself is opened exactly once, by the admitter, before it forks
//! any worker (`semaphores.c`'s `log_mutex`, reused here, is what then
//! serializes every process's writes to that one inherited file
//! description). Each worker process inherits the same open file — not just
//! the same path — so a rotation performed by any one of them is visible to
//! every sibling's next write instead of a stale pre-rotation fd quietly
//! writing past the renamed `.old` file forever.

use std::cell::UnsafeCell;
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use crate::date::access_log_timestamp;
use crate::ipc::sem::NamedSemaphore;
use crate::parser::{Method, Status, Version};

/// Log files are rotated to `<path>.old` once they cross this size.
pub const ROTATE_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;

/// Failure to open, write, or rotate the log file.
#[derive(Debug)]
pub struct AccessLogError(io::Error);

impl Display for AccessLogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "access log error: {}", self.0)
    }
}

impl std::error::Error for AccessLogError {}

impl From<io::Error> for AccessLogError {
    fn from(err: io::Error) -> Self {
        AccessLogError(err)
    }
}

struct Inner {
    file: File,
    path: PathBuf,
}

static INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A named-semaphore-serialized, append-only access log.
///
/// Created once by the admitter, before any worker process is forked — see
/// [`crate::server::Server::bind`] — and shared by every worker thereafter
/// through ordinary `fork` inheritance of this process's open file
/// descriptors.
pub struct AccessLog {
    inner: UnsafeCell<Inner>,
    mutex: NamedSemaphore,
    sem_name: String,
}

// `inner` is only ever touched while `mutex` is held, in whichever process
// currently holds it — the same discipline the shared-memory structures in
// `queue`/`stats` use.
unsafe impl Send for AccessLog {}
unsafe impl Sync for AccessLog {}

impl AccessLog {
    /// Opens (creating if necessary) the log file at `path` in append mode.
    pub fn open(path: &Path) -> Result<Self, AccessLogError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let id = INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let sem_name = format!("/vellum-{}-log-{id}", std::process::id());
        let mutex = NamedSemaphore::create(&sem_name, 1)?;
        Ok(AccessLog {
            inner: UnsafeCell::new(Inner {
                file,
                path: path.to_path_buf(),
            }),
            mutex,
            sem_name,
        })
    }

    /// Appends one request's worth of log line, formatted as
    /// `<ip> - - [<timestamp>] "<METHOD> <PATH> <VERSION>" <STATUS> <BYTES>`.
    ///
    /// Flushes immediately and checks for rotation before returning, so the
    /// next caller never races a rotation mid-line.
    #[allow(clippy::too_many_arguments)]
    pub fn log(
        &self,
        remote_ip: IpAddr,
        time: SystemTime,
        method: Method,
        path: &str,
        version: Version,
        status: Status,
        bytes: u64,
    ) -> Result<(), AccessLogError> {
        self.write_line(
            remote_ip,
            time,
            &format!("{method} {path} {version}"),
            status,
            bytes,
        )
    }

    /// Logs a connection that never reached a request handler — the
    /// admission queue or a worker's internal task queue was full (spec §7
    /// capacity errors: "count under 5xx, log"). The request-line field is
    /// rendered as `-`, the original C logger's placeholder for a field it
    /// doesn't have (`logger.c`'s `format_apache_combined`).
    pub fn log_rejection(
        &self,
        remote_ip: IpAddr,
        time: SystemTime,
        status: Status,
    ) -> Result<(), AccessLogError> {
        self.write_line(remote_ip, time, "-", status, 0)
    }

    fn write_line(
        &self,
        remote_ip: IpAddr,
        time: SystemTime,
        request_line: &str,
        status: Status,
        bytes: u64,
    ) -> Result<(), AccessLogError> {
        let line = format!(
            "{} - - [{}] \"{}\" {} {}\n",
            remote_ip,
            access_log_timestamp(time),
            request_line,
            status.code(),
            bytes,
        );

        self.mutex.acquire();
        // SAFETY: `self.mutex` makes this the only process touching `inner`
        // for the duration of this block, across every process sharing it.
        let result = unsafe {
            let inner = &mut *self.inner.get();
            (|| -> Result<(), AccessLogError> {
                inner.file.write_all(line.as_bytes())?;
                inner.file.flush()?;
                let len = inner.file.metadata()?.len();
                if len >= ROTATE_THRESHOLD_BYTES {
                    Self::rotate(inner)?;
                }
                Ok(())
            })()
        };
        self.mutex.release();
        result
    }

    fn rotate(inner: &mut Inner) -> Result<(), AccessLogError> {
        let mut rotated = inner.path.clone().into_os_string();
        rotated.push(".old");
        std::fs::rename(&inner.path, rotated)?;
        inner.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&inner.path)?;
        Ok(())
    }

    /// Unlinks this instance's semaphore name. Called once by the admitter
    /// during [`crate::server::Server::shutdown`], after every worker
    /// process has been waited on.
    pub fn unlink_semaphore(&self) {
        crate::ipc::sem::unlink(&self.sem_name);
    }
}
