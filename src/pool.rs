//! Per-worker internal task queue and thread pool.
//!
//! A worker's main thread drains the shared admission queue and `submit`s
//! each handle here; a fixed set of threads blocks on a not-empty condition
//! variable, pops, and runs the request handler. A mutex + condvar guarding a
//! bounded `VecDeque` is enough here — unlike the admission queue, this
//! internal queue has exactly one producer (the worker's own main thread),
//! so there's no cross-thread admission race to arbitrate with counting
//! semaphores.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

/// A worker's main thread holds its [`ThreadPool`] behind an `Arc` (so it
/// can keep submitting while pool threads drain), so joining can't consume
/// `self` by value the way a directly-owned pool could. The handles live
/// behind this instead, taken out exactly once by whichever caller reaches
/// [`ThreadPool::join`] first.
type Handles = Mutex<Option<Vec<JoinHandle<()>>>>;

/// Failure to accept work. Carries the task back to the caller — the
/// worker's main loop needs it to answer the rejected connection with an
/// inline 503.
#[derive(Debug, PartialEq, Eq)]
pub struct Full<T>(pub T);

impl<T> std::fmt::Display for Full<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("worker task queue is full")
    }
}

impl<T: std::fmt::Debug> std::error::Error for Full<T> {}

struct Shared<T> {
    queue: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    capacity: usize,
    shutting_down: std::sync::atomic::AtomicBool,
}

/// A fixed-size pool of threads draining a bounded internal queue.
///
/// `T` is the unit of work — in production, a connection handle; tests pass
/// plain closures-as-data or integers.
pub struct ThreadPool<T> {
    shared: Arc<Shared<T>>,
    handles: Handles,
}

impl<T: Send + 'static> ThreadPool<T> {
    /// Spawns `threads` worker threads, each running `run` on every task it
    /// pops, and a bounded queue of `capacity` pending tasks.
    pub fn new<F>(threads: usize, capacity: usize, run: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        assert!(threads > 0, "thread pool needs at least one thread");
        assert!(capacity > 0, "thread pool queue capacity must be nonzero");

        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            capacity,
            shutting_down: std::sync::atomic::AtomicBool::new(false),
        });
        let run = Arc::new(run);

        let handles = (0..threads)
            .map(|_| {
                let shared = Arc::clone(&shared);
                let run = Arc::clone(&run);
                thread::spawn(move || worker_loop(shared, run))
            })
            .collect();

        ThreadPool {
            shared,
            handles: Mutex::new(Some(handles)),
        }
    }

    /// Attempts to place `task` on the queue. Fails with [`Full`] when the
    /// queue is at capacity — callers (the worker's main loop) respond to
    /// this by answering the connection with an inline 503 themselves.
    pub fn submit(&self, task: T) -> Result<(), Full<T>> {
        let mut queue = self.shared.queue.lock().expect("pool queue mutex poisoned");
        if queue.len() >= self.shared.capacity {
            return Err(Full(task));
        }
        queue.push_back(task);
        drop(queue);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Stops accepting new structural work and wakes every idle thread so
    /// it can observe shutdown and exit. Threads already running a task
    /// finish it first — shutdown never interrupts an in-flight request.
    pub fn shutdown(&self) {
        self.shared
            .shutting_down
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self.shared.not_empty.notify_all();
    }

    /// Blocks until every worker thread has exited. Call after
    /// [`ThreadPool::shutdown`]. Safe to call through a shared `Arc` — the
    /// handles are taken out of their `Mutex` exactly once; a second caller
    /// (or a second call from the same caller) simply finds nothing left to
    /// join and returns immediately.
    pub fn join(&self) {
        let handles = self.handles.lock().expect("pool handles mutex poisoned").take();
        for handle in handles.into_iter().flatten() {
            let _ = handle.join();
        }
    }

    /// Number of tasks currently queued (not counting ones a thread has
    /// already popped and is running).
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().expect("pool queue mutex poisoned").len()
    }
}

fn worker_loop<T>(shared: Arc<Shared<T>>, run: Arc<dyn Fn(T) + Send + Sync>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().expect("pool queue mutex poisoned");
            loop {
                if let Some(task) = queue.pop_front() {
                    break Some(task);
                }
                if shared.shutting_down.load(std::sync::atomic::Ordering::SeqCst) {
                    break None;
                }
                queue = shared
                    .not_empty
                    .wait(queue)
                    .expect("pool queue mutex poisoned");
            }
        };

        match task {
            Some(task) => {
                // A panicking request handler must not take this thread down
                // with it, and must not leave the queue mutex or condvar in
                // a state the next task can't use — `run` is called behind
                // `catch_unwind` so one bad request can't knock out the
                // whole pool, let alone anything shared across workers (see
                // `stats::Stats`/`access_log::AccessLog`'s poison-recovering
                // locks).
                if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    run(task)
                })) {
                    let msg = panic_message(&payload);
                    log::error!("pool task panicked, discarding and continuing: {msg}");
                }
            }
            None => return,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn runs_every_submitted_task() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let pool = ThreadPool::new(4, 16, move |_: u32| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        for i in 0..10 {
            pool.submit(i).unwrap();
        }
        // give threads a moment to drain; shutdown+join then guarantees it.
        thread::sleep(Duration::from_millis(50));
        pool.shutdown();
        pool.join();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn submit_fails_when_queue_is_saturated_before_any_thread_drains() {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let rx = Mutex::new(rx);
        let pool = ThreadPool::new(1, 1, move |_: u32| {
            // block the single worker thread until the test releases it.
            let _ = rx.lock().unwrap().recv();
        });

        pool.submit(1).unwrap(); // picked up immediately by the one thread
        thread::sleep(Duration::from_millis(20));
        pool.submit(2).unwrap(); // fills the queue
        assert_eq!(pool.submit(3), Err(Full(3)));

        tx.send(()).unwrap();
        pool.shutdown();
        pool.join();
    }

    #[test]
    fn a_panicking_task_does_not_stop_the_thread_from_running_later_tasks() {
        let done = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&done);
        let pool = ThreadPool::new(1, 8, move |n: u32| {
            if n == 0 {
                panic!("boom");
            }
            d.fetch_add(1, Ordering::SeqCst);
        });

        pool.submit(0).unwrap(); // panics, but shouldn't wedge the thread
        pool.submit(1).unwrap();
        pool.submit(2).unwrap();
        thread::sleep(Duration::from_millis(50));
        pool.shutdown();
        pool.join();
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn shutdown_lets_in_flight_task_finish() {
        let done = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&done);
        let pool = ThreadPool::new(1, 4, move |_: u32| {
            thread::sleep(Duration::from_millis(30));
            d.fetch_add(1, Ordering::SeqCst);
        });
        pool.submit(1).unwrap();
        thread::sleep(Duration::from_millis(5));
        pool.shutdown();
        pool.join();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
