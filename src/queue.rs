//! Cross-process admission queue (spec §3/§4.1/§9, C5): a shared-memory
//! circular buffer of connection metadata, guarded by named POSIX
//! semaphores, with the accepted socket itself handed across the
//! admitter/worker process boundary via `SCM_RIGHTS` over a `socketpair`
//! inherited through `fork`.
//!
//! Grounded on `original_source/src/shared_memory.c` (the shared region)
//! and `semaphores.c` (`empty_slots`/`filled_slots`/`queue_mutex`, reused
//! here as three named semaphores) for the slot-and-backpressure protocol.
//! The original pairs that protocol with a bare `int client_fd` inside the
//! shared record, which only ever works if every worker already has that
//! fd number in its own table — untrue here, since `master.c` forks every
//! worker before the accept loop that produces those fds even starts. This
//! queue instead transports the accepted socket itself as `SCM_RIGHTS`
//! ancillary data, sent inside the same `queue_mutex` critical section that
//! updates `head`/`tail`, so the fd datagram and the metadata slot it
//! belongs to can never be read out of order by a racing worker process.

use std::fmt::Display;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::fd::{FromRawFd, IntoRawFd, RawFd};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::conn::ConnectionHandle;
use crate::ipc::{fdpass, sem::NamedSemaphore, shm};

/// Upper bound on `capacity` — spec §6's `MAX_QUEUE_SIZE` ranges 1..=10000.
/// The shared region is sized for this maximum once, before any worker is
/// forked, so it never needs to grow afterward.
const MAX_QUEUE_CAPACITY: usize = 10_000;

/// Failure modes for [`AdmissionQueue`] operations.
#[derive(Debug, PartialEq, Eq)]
pub enum QueueError {
    /// `try_enqueue` found the queue at capacity.
    Full,
    /// `shutdown` has been called; the queue no longer accepts or yields
    /// handles.
    ShuttingDown,
}

impl Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            QueueError::Full => "admission queue is full",
            QueueError::ShuttingDown => "admission queue is shutting down",
        })
    }
}

impl std::error::Error for QueueError {}

/// Plain-old-data connection metadata — the part of a [`ConnectionHandle`]
/// that fits in shared memory. IPv4-only, per spec §6 ("TCP over IPv4").
#[repr(C)]
#[derive(Clone, Copy)]
struct ConnectionRecord {
    peer_ip: [u8; 4],
    peer_port: u16,
    _pad: u16,
    arrived_at_secs: u64,
    arrived_at_nanos: u32,
    _pad2: u32,
}

impl ConnectionRecord {
    fn new(peer_addr: SocketAddr, arrived_at: SystemTime) -> Self {
        let peer_ip = match peer_addr {
            SocketAddr::V4(a) => a.ip().octets(),
            SocketAddr::V6(_) => unreachable!("listener is bound IPv4-only, spec §6"),
        };
        let since_epoch = arrived_at.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        ConnectionRecord {
            peer_ip,
            peer_port: peer_addr.port(),
            _pad: 0,
            arrived_at_secs: since_epoch.as_secs(),
            arrived_at_nanos: since_epoch.subsec_nanos(),
            _pad2: 0,
        }
    }

    fn peer_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(self.peer_ip), self.peer_port))
    }

    fn arrived_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::new(self.arrived_at_secs, self.arrived_at_nanos)
    }
}

#[repr(C)]
struct QueueShared {
    head: usize,
    tail: usize,
    count: usize,
    capacity: usize,
    shutting_down: AtomicBool,
    slots: [ConnectionRecord; MAX_QUEUE_CAPACITY],
}

/// A bounded, multi-producer multi-consumer FIFO of accepted connections,
/// shared across OS process boundaries.
///
/// Created once by the admitter, before it forks any worker (see
/// [`crate::server::Server::bind`]) — every field here is either a pointer
/// into `MAP_SHARED` memory, a named semaphore, or a raw socketpair fd, all
/// of which stay valid and correctly shared in a forked child without any
/// further setup.
pub struct AdmissionQueue {
    shared: NonNull<QueueShared>,
    empty: NamedSemaphore,
    filled: NamedSemaphore,
    mutex: NamedSemaphore,
    fd_tx: RawFd,
    fd_rx: RawFd,
}

// Every field is either process-shared memory or a primitive already valid
// for concurrent use from many threads/processes at once.
unsafe impl Send for AdmissionQueue {}
unsafe impl Sync for AdmissionQueue {}

impl AdmissionQueue {
    /// Creates a queue with room for `capacity` handles. `capacity` must be
    /// in `1..=10000` — spec §6 enforces the same range at config load.
    ///
    /// Must be called exactly once, by the admitter, before any worker
    /// process is forked.
    pub fn new(capacity: usize) -> io::Result<Self> {
        assert!(capacity >= 1, "admission queue capacity must be nonzero");
        assert!(
            capacity <= MAX_QUEUE_CAPACITY,
            "admission queue capacity exceeds the shared-region maximum"
        );

        let region = shm::alloc(std::mem::size_of::<QueueShared>())?;
        let shared = region.cast::<QueueShared>();
        // SAFETY: `region` is exclusively ours, freshly mapped, and sized
        // for `QueueShared`; the `slots` array's all-zero bit pattern left
        // by the kernel is already a valid `[ConnectionRecord; N]`, so only
        // the scalar header fields need an explicit initializing write.
        unsafe {
            let ptr = shared.as_ptr();
            std::ptr::write(std::ptr::addr_of_mut!((*ptr).head), 0);
            std::ptr::write(std::ptr::addr_of_mut!((*ptr).tail), 0);
            std::ptr::write(std::ptr::addr_of_mut!((*ptr).count), 0);
            std::ptr::write(std::ptr::addr_of_mut!((*ptr).capacity), capacity);
            std::ptr::write(std::ptr::addr_of_mut!((*ptr).shutting_down), AtomicBool::new(false));
        }

        let pid = std::process::id();
        let empty = NamedSemaphore::create(&format!("/vellum-{pid}-empty"), capacity as u32)?;
        let filled = NamedSemaphore::create(&format!("/vellum-{pid}-filled"), 0)?;
        let mutex = NamedSemaphore::create(&format!("/vellum-{pid}-qmutex"), 1)?;
        let (fd_tx, fd_rx) = fdpass::socketpair()?;

        Ok(AdmissionQueue {
            shared,
            empty,
            filled,
            mutex,
            fd_tx,
            fd_rx,
        })
    }

    fn shared(&self) -> &QueueShared {
        // SAFETY: the pointee outlives every process holding this struct —
        // it's backed by a mapping none of them ever unmaps.
        unsafe { self.shared.as_ref() }
    }

    /// Non-blocking insert: fails with [`QueueError::Full`] if every slot is
    /// taken, or [`QueueError::ShuttingDown`] once shutdown has begun —
    /// either way the handle is handed back so the rejecting caller (the
    /// admitter, spec §4.5) can still synthesize a 503 on the connection
    /// itself.
    pub fn try_enqueue(
        &self,
        conn: ConnectionHandle<std::net::TcpStream>,
    ) -> Result<(), (QueueError, ConnectionHandle<std::net::TcpStream>)> {
        if self.is_shutting_down() {
            return Err((QueueError::ShuttingDown, conn));
        }
        if !self.empty.try_acquire() {
            return Err((QueueError::Full, conn));
        }
        self.push(conn);
        Ok(())
    }

    fn push(&self, conn: ConnectionHandle<std::net::TcpStream>) {
        let ConnectionHandle {
            stream,
            peer_addr,
            arrived_at,
        } = conn;
        let record = ConnectionRecord::new(peer_addr, arrived_at);
        let raw_fd = stream.into_raw_fd();

        self.mutex.acquire();
        // SAFETY: `self.mutex` makes this the only process touching
        // `head`/`tail`/`count`/the slot index computed from them right now.
        unsafe {
            let shared = self.shared.as_ptr();
            let idx = (*shared).tail;
            (*shared).slots[idx] = record;
            (*shared).tail = (idx + 1) % (*shared).capacity;
            (*shared).count += 1;
        }
        let bytes = unsafe {
            std::slice::from_raw_parts(
                &record as *const ConnectionRecord as *const u8,
                std::mem::size_of::<ConnectionRecord>(),
            )
        };
        // Sent inside the critical section (see module docs) so the fd
        // datagram and the slot it belongs to can't desync under a race.
        if let Err(e) = fdpass::send_with_fd(self.fd_tx, bytes, raw_fd) {
            log::error!("failed to pass accepted socket to a worker: {e}");
        }
        // The kernel keeps the description alive for whichever worker
        // `recvmsg`s it; this process's own copy must still be closed.
        fdpass::close(raw_fd);
        self.mutex.release();
        self.filled.release();
    }

    /// Blocking remove. Fails with [`QueueError::ShuttingDown`] once
    /// shutdown has begun and no handle remains to drain. Called by a
    /// worker process's main loop ([`crate::worker::worker_main`]).
    pub fn dequeue(&self) -> Result<ConnectionHandle<std::net::TcpStream>, QueueError> {
        loop {
            if self.is_shutting_down() && self.shared().count == 0 {
                return Err(QueueError::ShuttingDown);
            }
            self.filled.acquire();
            if self.is_shutting_down() && self.shared().count == 0 {
                // woken by shutdown's release_n with nothing left to take.
                self.filled.release();
                return Err(QueueError::ShuttingDown);
            }

            self.mutex.acquire();
            let taken = unsafe {
                let shared = self.shared.as_ptr();
                if (*shared).count == 0 {
                    None
                } else {
                    let idx = (*shared).head;
                    let record = (*shared).slots[idx];
                    (*shared).head = (idx + 1) % (*shared).capacity;
                    (*shared).count -= 1;
                    Some(record)
                }
            };
            let record = match taken {
                Some(record) => record,
                None => {
                    // spurious wake from a shutdown broadcast; re-check.
                    self.mutex.release();
                    continue;
                }
            };
            let recv = fdpass::recv_with_fd(self.fd_rx, std::mem::size_of::<ConnectionRecord>());
            self.mutex.release();
            self.empty.release();

            match recv {
                Ok((_payload, fd)) => {
                    // SAFETY: `fd` was just received as an owned descriptor
                    // to a connected `AF_INET` stream socket via `SCM_RIGHTS`.
                    let stream = unsafe { std::net::TcpStream::from_raw_fd(fd) };
                    return Ok(ConnectionHandle::new(
                        stream,
                        record.peer_addr(),
                        record.arrived_at(),
                    ));
                }
                Err(e) => {
                    log::error!("failed to receive a passed socket from the admitter: {e}");
                    continue;
                }
            }
        }
    }

    /// `true` once [`AdmissionQueue::shutdown`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shared().shutting_down.load(Ordering::SeqCst)
    }

    /// Irreversibly stops the queue, waking every blocked `dequeue` caller
    /// so it observes [`QueueError::ShuttingDown`]. Idempotent.
    ///
    /// Only the admitter calls this, and only after it has stopped
    /// accepting — see [`crate::server::Server::shutdown`].
    pub fn shutdown(&self) {
        if self
            .shared()
            .shutting_down
            .swap(true, Ordering::SeqCst)
        {
            return;
        }
        // Tops `filled` up to `capacity`, not past it, so every blocked
        // dequeuer wakes without inflating the semaphore beyond what it was
        // ever seeded with (spec §8's invariant that `empty + filled ==
        // capacity` at quiescence).
        let capacity = self.shared().capacity;
        self.filled
            .release_n(capacity.saturating_sub(self.filled.value()));
    }

    /// Queue capacity, as configured.
    pub fn capacity(&self) -> usize {
        self.shared().capacity
    }

    /// Unlinks this queue's named semaphores. Called once by the admitter
    /// during [`crate::server::Server::shutdown`], after every worker
    /// process has been waited on — mirrors `master.c`'s `cleanup_master`
    /// calling `destroy_semaphores` only once every worker pid is reaped.
    pub fn unlink_semaphores(&self) {
        let pid = std::process::id();
        crate::ipc::sem::unlink(&format!("/vellum-{pid}-empty"));
        crate::ipc::sem::unlink(&format!("/vellum-{pid}-filled"));
        crate::ipc::sem::unlink(&format!("/vellum-{pid}-qmutex"));
    }
}

impl Drop for AdmissionQueue {
    fn drop(&mut self) {
        fdpass::close(self.fd_tx);
        fdpass::close(self.fd_rx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr as V4, TcpListener};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration as StdDuration;

    /// A connected loopback pair — the only kind of fd this queue can
    /// transport, since it passes real sockets via `SCM_RIGHTS`, not
    /// arbitrary in-memory test doubles.
    fn connected_pair() -> std::net::TcpStream {
        let listener = TcpListener::bind((V4::LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (_server_side, _) = listener.accept().unwrap();
        client
    }

    fn handle(port: u16) -> ConnectionHandle<std::net::TcpStream> {
        ConnectionHandle::new(
            connected_pair(),
            SocketAddr::new(IpAddr::V4(V4::LOCALHOST), port),
            SystemTime::now(),
        )
    }

    #[test]
    fn enqueue_then_dequeue_preserves_fifo_order() {
        let q = AdmissionQueue::new(4).unwrap();
        q.try_enqueue(handle(1)).unwrap();
        q.try_enqueue(handle(2)).unwrap();
        q.try_enqueue(handle(3)).unwrap();
        assert_eq!(q.dequeue().unwrap().peer_addr.port(), 1);
        assert_eq!(q.dequeue().unwrap().peer_addr.port(), 2);
        assert_eq!(q.dequeue().unwrap().peer_addr.port(), 3);
    }

    #[test]
    fn try_enqueue_fails_full_then_succeeds_after_a_dequeue() {
        let q = AdmissionQueue::new(1).unwrap();
        q.try_enqueue(handle(1)).unwrap();
        let err = q.try_enqueue(handle(2));
        assert!(matches!(err, Err((QueueError::Full, _))));
        assert_eq!(q.dequeue().unwrap().peer_addr.port(), 1);
        assert!(q.try_enqueue(handle(2)).is_ok());
    }

    #[test]
    fn shutdown_wakes_blocked_dequeue() {
        let q = Arc::new(AdmissionQueue::new(2).unwrap());
        let waiter = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.dequeue().is_err())
        };
        thread::sleep(StdDuration::from_millis(20));
        q.shutdown();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let q = AdmissionQueue::new(2).unwrap();
        q.shutdown();
        q.shutdown();
        assert!(q.is_shutting_down());
    }

    #[test]
    fn operations_after_shutdown_fail_fast() {
        let q = AdmissionQueue::new(2).unwrap();
        q.shutdown();
        assert!(matches!(
            q.try_enqueue(handle(1)),
            Err((QueueError::ShuttingDown, _))
        ));
        assert_eq!(q.dequeue().unwrap_err(), QueueError::ShuttingDown);
    }

    #[test]
    fn semaphore_invariant_holds_after_quiescence() {
        let q = AdmissionQueue::new(4).unwrap();
        q.try_enqueue(handle(1)).unwrap();
        q.try_enqueue(handle(2)).unwrap();
        q.dequeue().unwrap();
        assert_eq!(q.empty.value() + q.filled.value(), q.capacity());
        assert_eq!(q.filled.value(), 1);
    }

    #[test]
    fn shutdown_does_not_release_past_capacity() {
        let q = AdmissionQueue::new(4).unwrap();
        q.try_enqueue(handle(1)).unwrap();
        q.try_enqueue(handle(2)).unwrap();
        q.dequeue().unwrap();
        q.shutdown();
        assert!(q.empty.value() <= q.capacity());
        assert!(q.filled.value() <= q.capacity());
    }
}
