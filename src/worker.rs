//! Worker runtime (spec §4.2, C6): a bounded internal thread pool paired
//! with the worker's own LRU file cache, running inside its own OS process.
//!
//! Grounded on `original_source/src/worker.c`'s `run_worker` (the loop a
//! forked worker enters immediately and never returns from) and
//! `master.c`'s `spawn_worker` (`fork`, then in the child: run, then
//! `exit`). The admitter forks one such process per `config.num_workers`
//! entry in [`crate::server::Server::bind`], before its own accept loop
//! starts — matching `run_master`'s fork-all-workers-first ordering. Each
//! worker process still runs its own internal [`ThreadPool`] of real OS
//! threads (spec §5's "Thread model" is explicit that this inner pool is
//! threads, not further processes).

use std::io;
use std::sync::Arc;

use crate::access_log::AccessLog;
use crate::cache::Cache;
use crate::conn::ConnectionHandle;
use crate::config::Config;
use crate::handler::{self, HandlerContext};
use crate::ipc::process::{self, Fork};
use crate::pool::{Full, ThreadPool};
use crate::queue::{AdmissionQueue, QueueError};
use crate::stats::Stats;

/// A handle to a forked worker process, held by the admitter only.
pub struct Worker {
    pid: libc::pid_t,
}

impl Worker {
    /// Forks a worker process. In the parent this returns immediately with
    /// a handle to the child's pid; the child never returns from this call —
    /// it runs [`worker_main`] until the admission queue shuts down, then
    /// calls [`std::process::exit`] directly, the same way `spawn_worker`
    /// never lets a child fall back into `run_master`'s loop.
    ///
    /// # Safety
    /// Must be called from the admitter's single thread, before any worker
    /// process exists — see [`crate::ipc::process::fork`]'s safety note.
    pub unsafe fn spawn(
        id: usize,
        config: Arc<Config>,
        admission: Arc<AdmissionQueue>,
        stats: Arc<Stats>,
        access_log: Arc<AccessLog>,
    ) -> io::Result<Self> {
        match process::fork()? {
            Fork::Parent { child } => Ok(Worker { pid: child }),
            Fork::Child => {
                worker_main(id, config, admission, stats, access_log);
                std::process::exit(0);
            }
        }
    }

    /// Waits for this worker process to exit. The shared admission queue
    /// must already be shut down — [`worker_main`] only exits its loop once
    /// `dequeue` reports [`QueueError::ShuttingDown`].
    pub fn join(self) {
        process::wait_for(self.pid);
    }

    /// This worker's process id, for diagnostics.
    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }
}

/// Runs entirely inside a forked worker process: builds the worker's own
/// cache and internal thread pool, then drains the shared admission queue
/// until shutdown, answering a full internal task queue with an inline 503
/// rather than blocking (spec §4.2's "why two queues").
fn worker_main(
    id: usize,
    config: Arc<Config>,
    admission: Arc<AdmissionQueue>,
    stats: Arc<Stats>,
    access_log: Arc<AccessLog>,
) {
    let cache = Arc::new(Cache::new(
        config.cache_size_mb as usize * 1024 * 1024,
        crate::cache::DEFAULT_MAX_FILE_SIZE,
    ));
    let ctx = Arc::new(HandlerContext {
        config: Arc::clone(&config),
        cache,
        stats: Arc::clone(&stats),
        access_log: Arc::clone(&access_log),
    });

    let run_ctx = Arc::clone(&ctx);
    let pool = Arc::new(ThreadPool::new(
        config.threads_per_worker.max(1) as usize,
        config.max_queue_size.max(1) as usize,
        move |conn: ConnectionHandle<std::net::TcpStream>| handler::handle(conn, &run_ctx),
    ));

    log::info!("worker {id} (pid {}) ready", std::process::id());

    loop {
        let conn = match admission.dequeue() {
            Ok(conn) => conn,
            Err(QueueError::ShuttingDown) => break,
            Err(QueueError::Full) => unreachable!("dequeue never fails with Full"),
        };

        if let Err(Full(conn)) = pool.submit(conn) {
            log::warn!("worker task queue full, rejecting connection with 503");
            reject(conn, &stats, &access_log);
        }
    }
    // Cancellation never interrupts an in-flight request (spec §4.2): this
    // only stops accepting *new* work, then waits for pool threads to drain
    // whatever they already popped.
    pool.shutdown();
}

fn reject(
    mut conn: ConnectionHandle<std::net::TcpStream>,
    stats: &Stats,
    access_log: &AccessLog,
) {
    let now = std::time::SystemTime::now();
    handler::respond_service_unavailable(&mut conn.stream, now);
    let _ = conn.stream.shutdown(std::net::Shutdown::Both);
    stats.record_rejection();
    let _ = access_log.log_rejection(conn.peer_addr.ip(), now, crate::parser::Status::ServiceUnavailable);
}
