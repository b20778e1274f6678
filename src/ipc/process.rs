//! `fork`/`waitpid`/`kill` wrappers for the admitter/worker process split.
//!
//! Grounded on `original_source/src/master.c`'s `run_master` (forks every
//! worker in a loop before installing signal handlers or entering the
//! accept loop) and `cleanup_master` (`SIGTERM` each worker pid, then
//! `waitpid` each one before tearing down shared state).

use std::io;

/// The result of [`fork`] in the calling process.
pub enum Fork {
    /// Still the parent; `child` is its new child's pid.
    Parent { child: libc::pid_t },
    /// This *is* the new child process.
    Child,
}

/// Forks the calling process.
///
/// # Safety
/// Only async-signal-safe work may happen between this call returning in
/// the child and that child either `exec`ing or calling
/// [`std::process::exit`] — in particular, no allocating logger call and no
/// taking a lock another thread might have held at fork time. Every caller
/// in this crate forks from the admitter's single thread, before any
/// worker-side threads exist, so this constraint holds.
pub unsafe fn fork() -> io::Result<Fork> {
    let pid = libc::fork();
    match pid {
        -1 => Err(io::Error::last_os_error()),
        0 => Ok(Fork::Child),
        child => Ok(Fork::Parent { child }),
    }
}

/// Blocks until `pid` exits, discarding its exit status — the admitter
/// (spec §4.5) only needs to know a worker has finished tearing down, not
/// how it exited.
pub fn wait_for(pid: libc::pid_t) {
    let mut status: libc::c_int = 0;
    loop {
        // SAFETY: `status` is a valid out-pointer for `waitpid(2)`.
        let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
        if rc == pid {
            return;
        }
        if rc == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            // ECHILD: already reaped, or never existed — nothing left to wait for.
            return;
        }
    }
}

/// Sends `SIGTERM` to `pid`. Best-effort: a process that already exited
/// yields `ESRCH`, which is not an error worth surfacing here.
pub fn terminate(pid: libc::pid_t) {
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
}
