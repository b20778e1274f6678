//! The admitter (spec §4.5, C8): owns the listening socket, runs the single
//! accept loop, and wires together the admission queue, worker processes,
//! statistics, and access log that every other component shares.
//!
//! Grounded on `original_source/src/master.c`'s `run_master`: every shared
//! resource (shared memory, named semaphores, the access log file) is
//! created once, then every worker is `fork`ed in a loop, and only after
//! that does the admitter enter its own accept loop. `cleanup_master`'s
//! teardown order — `SIGTERM` each worker, `waitpid` each one, only then
//! destroy the shared semaphores — is mirrored in [`Server::shutdown`].

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::access_log::AccessLog;
use crate::conn::ConnectionHandle;
use crate::config::Config;
use crate::handler;
use crate::net::{TcpListener, TcpStream};
use crate::queue::AdmissionQueue;
use crate::stats::Stats;
use crate::worker::Worker;

/// How long one blocking `accept` call waits before timing out and giving
/// `run`'s loop a chance to notice a shutdown request (spec §5: "admitter
/// suspends only in accept" — this bounds that one suspension point instead
/// of adding a second poll/sleep cycle alongside it).
const ACCEPT_TIMEOUT: Duration = Duration::from_millis(250);

/// The admitter process (spec §4.5). Concrete over `std::net::{TcpListener,
/// TcpStream}`: worker processes receive an accepted connection's socket as
/// an `SCM_RIGHTS`-passed real file descriptor (see [`crate::queue`]), which
/// only a genuine OS socket — never a mock test double — can be.
pub struct Server {
    listener: std::net::TcpListener,
    config: Arc<Config>,
    admission: Arc<AdmissionQueue>,
    stats: Arc<Stats>,
    access_log: Arc<AccessLog>,
    workers: Vec<Worker>,
}

impl Server {
    /// Binds the listening socket, creates every shared resource (admission
    /// queue, statistics, access log), then forks `config.num_workers`
    /// worker processes — in that order, so every worker inherits a fully
    /// set-up shared world and the admitter never hands a worker a resource
    /// created after it was already forked.
    pub fn bind(addr: std::net::SocketAddr, config: Config) -> io::Result<Self> {
        let listener = std::net::TcpListener::bind(addr)?;
        listener.set_accept_timeout(Some(ACCEPT_TIMEOUT))?;

        let config = Arc::new(config);
        let admission = Arc::new(AdmissionQueue::new(config.max_queue_size as usize)?);
        let stats = Arc::new(Stats::new()?);
        let access_log = Arc::new(
            AccessLog::open(&config.log_file)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?,
        );

        let mut workers = Vec::with_capacity(config.num_workers as usize);
        for id in 0..config.num_workers {
            // SAFETY: the admitter is still single-threaded here — no
            // worker has been forked yet this iteration, and none of this
            // process's own background threads exist at this point in
            // `main`'s call graph.
            let worker = unsafe {
                Worker::spawn(
                    id as usize,
                    Arc::clone(&config),
                    Arc::clone(&admission),
                    Arc::clone(&stats),
                    Arc::clone(&access_log),
                )?
            };
            workers.push(worker);
        }

        log::info!(
            "vellum listening on {} with {} worker process(es)",
            addr,
            config.num_workers
        );

        Ok(Server {
            listener,
            config,
            admission,
            stats,
            access_log,
            workers,
        })
    }

    /// Runs the accept loop until `shutdown` is observed set. Every accepted
    /// connection is handed to [`AdmissionQueue::try_enqueue`]; on `Full` the
    /// admitter synthesizes a 503 itself (spec §4.5) rather than blocking —
    /// a blocking `enqueue` here would let one overloaded moment stall
    /// acceptance of everything after it.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    let conn = ConnectionHandle::new(stream, peer_addr, SystemTime::now());
                    if let Err((crate::queue::QueueError::Full, conn)) = self.admission.try_enqueue(conn) {
                        log::warn!("admission queue full, rejecting {peer_addr} with 503");
                        self.reject(conn);
                    }
                    // `ShuttingDown` can only race in here between the
                    // `shutdown.load` check and this `accept` — the loop is
                    // about to exit on its next iteration either way, so the
                    // connection is simply dropped rather than answered.
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    // the accept timeout elapsed with nothing pending; loop
                    // back around to re-check `shutdown`.
                }
                Err(e) => {
                    log::error!("accept failed: {e}");
                }
            }
        }
        self.shutdown();
    }

    /// Stops accepting, shuts down the admission queue (waking every
    /// blocked worker main loop), waits for every worker process to drain
    /// and exit, then unlinks every named semaphore this server created —
    /// mirroring `cleanup_master`'s ordering exactly.
    pub fn shutdown(&mut self) {
        self.admission.shutdown();
        for worker in self.workers.drain(..) {
            worker.join();
        }
        self.admission.unlink_semaphores();
        self.stats.unlink_semaphore();
        self.access_log.unlink_semaphore();
        log::info!("vellum shut down cleanly");
    }

    /// A snapshot of cross-process statistics (spec §3, C2), exposed for
    /// callers that want to report on a running server (tests, a future
    /// status endpoint).
    pub fn stats(&self) -> crate::stats::Snapshot {
        self.stats.snapshot()
    }

    /// Synthesizes a 503 directly on a connection the admission queue
    /// couldn't accept (spec §4.5), then records it.
    fn reject(&self, mut conn: ConnectionHandle<std::net::TcpStream>) {
        let now = SystemTime::now();
        handler::respond_service_unavailable(&mut conn.stream, now);
        let _ = conn.stream.shutdown(std::net::Shutdown::Both);
        self.stats.record_rejection();
        let _ = self
            .access_log
            .log_rejection(conn.peer_addr.ip(), now, crate::parser::Status::ServiceUnavailable);
    }

    /// The document root this server was configured with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The address actually bound — distinct from the address passed to
    /// [`Server::bind`] when that address's port was `0`, letting tests bind
    /// an ephemeral port and then discover it.
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}
