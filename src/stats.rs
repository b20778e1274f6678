//! Cross-process statistics aggregate (spec §3, C2).
//!
//! A single named-semaphore-guarded record in shared memory, updated
//! exactly once per request from [`crate::handler`]'s `Finalize` state and
//! read back by anything that wants a snapshot (a future `/stats` endpoint,
//! a signal handler, a test). Counts are monotonic for the lifetime of the
//! admitter; there is no reset operation because nothing in the spec calls
//! for one.
//!
//! Grounded on `original_source/src/shared_memory.c` (the region) and
//! `semaphores.c`'s `stats_mutex` for cross-process mutual exclusion — every
//! worker process updates the same memory the admitter allocated before
//! forking any of them.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::ipc::{sem::NamedSemaphore, shm};
use crate::parser::Status;

/// A point-in-time copy of the counters in [`Stats`], safe to read without
/// holding any lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Snapshot {
    pub total_requests: u64,
    pub bytes_transferred: u64,
    pub status_2xx: u64,
    pub status_4xx: u64,
    pub status_5xx: u64,
    pub peak_concurrency: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub response_time_micros: u64,
}

impl Snapshot {
    /// `cache_hits / (cache_hits + cache_misses)`, or `0.0` if neither has
    /// been recorded yet.
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Mean response time across every recorded request.
    pub fn mean_response_time(&self) -> Duration {
        if self.total_requests == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(self.response_time_micros / self.total_requests)
        }
    }
}

/// Layout of the shared region. Every field is a plain `u64` written only
/// while `mutex` is held, except `in_flight` which doubles as a process-wide
/// concurrency counter — still only ever touched under the same lock.
#[repr(C)]
struct Counters {
    in_flight: u64,
    total_requests: u64,
    bytes_transferred: u64,
    status_2xx: u64,
    status_4xx: u64,
    status_5xx: u64,
    peak_concurrency: u64,
    cache_hits: u64,
    cache_misses: u64,
    response_time_micros: u64,
}

/// A process-unique id so concurrently-created `Stats` instances (distinct
/// servers in one test binary, say) never collide on the same semaphore
/// name — unlike the admission queue and access log, a process normally
/// creates only one of these, but tests create many.
static INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Shared-memory statistics, readable and writable by the admitter and
/// every worker process (spec §5: "shared statistics/log" is the one
/// channel workers coordinate through).
///
/// Created once by the admitter, before it forks any worker — see
/// [`crate::server::Server::bind`].
pub struct Stats {
    shared: NonNull<Counters>,
    mutex: NamedSemaphore,
    sem_name: String,
}

unsafe impl Send for Stats {}
unsafe impl Sync for Stats {}

impl Stats {
    pub fn new() -> std::io::Result<Self> {
        let region = shm::alloc(std::mem::size_of::<Counters>())?;
        let shared = region.cast::<Counters>();
        // SAFETY: `region` is exclusively ours and all-zero, which is
        // already a valid all-zero `Counters`; no initializing write needed.

        let id = INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let sem_name = format!("/vellum-{}-stats-{id}", std::process::id());
        let mutex = NamedSemaphore::create(&sem_name, 1)?;

        Ok(Stats {
            shared,
            mutex,
            sem_name,
        })
    }

    fn with_lock<R>(&self, f: impl FnOnce(&mut Counters) -> R) -> R {
        self.mutex.acquire();
        // SAFETY: `self.mutex` makes this the only process touching the
        // region for the duration of `f`.
        let result = unsafe { f(&mut *self.shared.as_ptr()) };
        self.mutex.release();
        result
    }

    /// Called when a connection is admitted into a worker, before the
    /// handler runs. Updates `peak_concurrency`.
    pub fn begin_request(&self) {
        self.with_lock(|c| {
            c.in_flight += 1;
            if c.in_flight > c.peak_concurrency {
                c.peak_concurrency = c.in_flight;
            }
        });
    }

    /// Called once from `Finalize`, regardless of which state the handler
    /// terminated in.
    pub fn record_request(&self, status: Status, bytes: u64, elapsed: Duration) {
        self.with_lock(|c| {
            c.in_flight = c.in_flight.saturating_sub(1);
            c.total_requests += 1;
            c.bytes_transferred += bytes;
            c.response_time_micros += elapsed.as_micros() as u64;
            if status.is_success() {
                c.status_2xx += 1;
            } else if status.is_client_error() {
                c.status_4xx += 1;
            } else if status.is_server_error() {
                c.status_5xx += 1;
            }
        });
    }

    /// Records a 503 synthesized directly by the admitter (admission queue
    /// full) or a worker's main thread (internal task queue full) — neither
    /// reaches [`Stats::begin_request`]/[`Stats::record_request`]'s normal
    /// in-flight bookkeeping, so this bumps `total_requests` and
    /// `status_5xx` only.
    pub fn record_rejection(&self) {
        self.with_lock(|c| {
            c.total_requests += 1;
            c.status_5xx += 1;
        });
    }

    pub fn record_cache_hit(&self) {
        self.with_lock(|c| c.cache_hits += 1);
    }

    pub fn record_cache_miss(&self) {
        self.with_lock(|c| c.cache_misses += 1);
    }

    /// A consistent copy of the current counters.
    pub fn snapshot(&self) -> Snapshot {
        self.with_lock(|c| Snapshot {
            total_requests: c.total_requests,
            bytes_transferred: c.bytes_transferred,
            status_2xx: c.status_2xx,
            status_4xx: c.status_4xx,
            status_5xx: c.status_5xx,
            peak_concurrency: c.peak_concurrency,
            cache_hits: c.cache_hits,
            cache_misses: c.cache_misses,
            response_time_micros: c.response_time_micros,
        })
    }

    /// Unlinks this instance's semaphore name. Called once by the admitter
    /// during [`crate::server::Server::shutdown`], after every worker
    /// process has been waited on.
    pub fn unlink_semaphore(&self) {
        crate::ipc::sem::unlink(&self.sem_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_status_classes() {
        let stats = Stats::new().unwrap();
        stats.begin_request();
        stats.record_request(Status::Ok, 5, Duration::from_millis(1));
        stats.begin_request();
        stats.record_request(Status::NotFound, 0, Duration::from_millis(1));
        stats.begin_request();
        stats.record_request(Status::ServiceUnavailable, 0, Duration::from_millis(1));

        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 3);
        assert_eq!(snap.status_2xx, 1);
        assert_eq!(snap.status_4xx, 1);
        assert_eq!(snap.status_5xx, 1);
        assert_eq!(snap.bytes_transferred, 5);
        stats.unlink_semaphore();
    }

    #[test]
    fn tracks_peak_concurrency() {
        let stats = Stats::new().unwrap();
        stats.begin_request();
        stats.begin_request();
        stats.begin_request();
        assert_eq!(stats.snapshot().peak_concurrency, 3);
        stats.record_request(Status::Ok, 0, Duration::ZERO);
        stats.begin_request();
        // still 3: concurrency dropped to 2, then rose to 3 again, never above.
        assert_eq!(stats.snapshot().peak_concurrency, 3);
        stats.unlink_semaphore();
    }

    #[test]
    fn admitter_rejection_counts_as_5xx_without_in_flight_bookkeeping() {
        let stats = Stats::new().unwrap();
        stats.record_rejection();
        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 1);
        assert_eq!(snap.status_5xx, 1);
        assert_eq!(snap.peak_concurrency, 0);
        stats.unlink_semaphore();
    }

    #[test]
    fn cache_hit_ratio_tracks_hits_and_misses() {
        let stats = Stats::new().unwrap();
        stats.record_cache_hit();
        stats.record_cache_hit();
        stats.record_cache_miss();
        let snap = stats.snapshot();
        assert_eq!(snap.cache_hits, 2);
        assert_eq!(snap.cache_misses, 1);
        assert!((snap.cache_hit_ratio() - (2.0 / 3.0)).abs() < 1e-9);
        stats.unlink_semaphore();
    }

    #[test]
    fn mean_response_time_is_zero_with_no_requests() {
        assert_eq!(Snapshot::default().mean_response_time(), Duration::ZERO);
    }

    #[test]
    fn concurrent_updates_from_many_threads_are_not_lost() {
        let stats = std::sync::Arc::new(Stats::new().unwrap());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let stats = std::sync::Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        stats.record_request(Status::Ok, 1, Duration::from_micros(1));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(stats.snapshot().total_requests, 400);
        stats.unlink_semaphore();
    }
}
