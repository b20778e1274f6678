//! Named POSIX semaphores (`sem_open`).
//!
//! Grounded on `original_source/src/semaphores.c`: one kernel-wide name per
//! role (`empty_slots`, `filled_slots`, `queue_mutex`, `stats_mutex`,
//! `log_mutex`), created once by the admitter before it forks any worker.
//! The pointer `sem_open` returns stays valid and correctly shared in every
//! forked child without reopening by name — `fork()` preserves all of a
//! process's memory mappings, including the one glibc's `sem_open`
//! maintains internally, so the raw pointer a struct holds is copied
//! byte-for-byte into the child and still refers to the same kernel
//! semaphore object.

use std::ffi::CString;
use std::io;

/// A named semaphore used both as a counting semaphore (`empty_slots`,
/// `filled_slots`) and, seeded at 1, as a mutex (`queue_mutex`,
/// `stats_mutex`, `log_mutex`) — exactly the dual role `semaphores.c`
/// assigns the same primitive.
pub struct NamedSemaphore {
    sem: *mut libc::sem_t,
}

// A `sem_t*` obtained from `sem_open` is safe to use concurrently from any
// number of threads or processes that hold a copy of the pointer — that's
// the entire point of a semaphore.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Creates (or reopens, if a stale semaphore of the same name survived
    /// a crashed prior run) the semaphore named `name`, seeded at `initial`.
    /// `name` must start with `/` and contain no further `/`, the POSIX
    /// naming rule `sem_open` enforces.
    pub fn create(name: &str, initial: u32) -> io::Result<Self> {
        let cname = CString::new(name).expect("semaphore name must not contain NUL");
        // SAFETY: `O_CREAT` with a valid name/mode/value per `sem_open(3)`.
        let sem = unsafe {
            libc::sem_open(cname.as_ptr(), libc::O_CREAT, 0o600 as libc::mode_t, initial)
        };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(NamedSemaphore { sem })
    }

    /// Blocks until a permit is available, retrying on `EINTR`.
    pub fn acquire(&self) {
        loop {
            let rc = unsafe { libc::sem_wait(self.sem) };
            if rc == 0 {
                return;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                panic!("sem_wait failed: {err}");
            }
        }
    }

    /// Non-blocking acquire; `false` if no permit was immediately available.
    pub fn try_acquire(&self) -> bool {
        loop {
            let rc = unsafe { libc::sem_trywait(self.sem) };
            if rc == 0 {
                return true;
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return false,
                _ => panic!("sem_trywait failed: {err}"),
            }
        }
    }

    pub fn release(&self) {
        let rc = unsafe { libc::sem_post(self.sem) };
        if rc != 0 {
            panic!("sem_post failed: {}", io::Error::last_os_error());
        }
    }

    /// Posts `n` permits in one step — used by shutdown to wake every
    /// blocked waiter without a per-waiter handshake.
    pub fn release_n(&self, n: usize) {
        for _ in 0..n {
            self.release();
        }
    }

    /// The semaphore's current value. Advisory: by the time the caller
    /// reads it, another process may already have changed it. Used for
    /// bounding shutdown's `release_n` and for tests' quiescence checks,
    /// same as the original's debugging use of `sem_getvalue`.
    pub fn value(&self) -> usize {
        let mut val: libc::c_int = 0;
        let rc = unsafe { libc::sem_getvalue(self.sem, &mut val) };
        if rc != 0 {
            panic!("sem_getvalue failed: {}", io::Error::last_os_error());
        }
        val.max(0) as usize
    }

    /// Closes this process's reference to the semaphore. Every process
    /// that holds a `NamedSemaphore` should let it drop (or call this
    /// explicitly) before exiting; only the admitter additionally calls
    /// [`unlink`] once, after every worker has been waited on.
    fn close(&self) {
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        self.close();
    }
}

/// Removes the semaphore's name from the system so no later, unrelated
/// process can reopen it. Called once by the admitter during
/// [`crate::server::Server::shutdown`], after every worker has exited —
/// mirrors `original_source/src/master.c`'s `cleanup_master` calling
/// `destroy_semaphores` only after every worker pid has been `waitpid`'d.
pub fn unlink(name: &str) {
    let cname = CString::new(name).expect("semaphore name must not contain NUL");
    unsafe {
        libc::sem_unlink(cname.as_ptr());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn unique_name(tag: &str) -> String {
        format!("/vellum-test-{tag}-{}-{}", std::process::id(), thread_id())
    }

    fn thread_id() -> u64 {
        // cheap uniqueness source for parallel test runs; not a real ID.
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        use std::hash::{Hash, Hasher};
        std::thread::current().id().hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn try_acquire_fails_when_empty() {
        let name = unique_name("empty");
        let sem = NamedSemaphore::create(&name, 0).unwrap();
        assert!(!sem.try_acquire());
        drop(sem);
        unlink(&name);
    }

    #[test]
    fn acquire_release_round_trips() {
        let name = unique_name("roundtrip");
        let sem = NamedSemaphore::create(&name, 1).unwrap();
        sem.acquire();
        assert_eq!(sem.value(), 0);
        sem.release();
        assert_eq!(sem.value(), 1);
        drop(sem);
        unlink(&name);
    }

    #[test]
    fn blocked_acquire_wakes_on_release() {
        let name = unique_name("wake");
        let sem = Arc::new(NamedSemaphore::create(&name, 0).unwrap());
        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.acquire())
        };
        thread::sleep(Duration::from_millis(20));
        sem.release();
        waiter.join().expect("waiter thread panicked");
        assert_eq!(sem.value(), 0);
        unlink(&name);
    }
}
