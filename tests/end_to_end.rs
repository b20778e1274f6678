//! End-to-end coverage over a real loopback socket: binds a [`Server`],
//! drives it with plain [`std::net::TcpStream`] clients, and checks the
//! wire-level response for each of the scenarios spec §8 calls out by name
//! (200, HEAD, 404, traversal 403, overload 503, cache hit).

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fake::faker::lorem::en::Paragraph;
use fake::Fake;

use vellum::config::Config;
use vellum::server::Server;

type TestServer = Server;

/// Binds a server on an ephemeral loopback port and runs it on a background
/// thread. Returns the bound address and a join handle that, once `shutdown`
/// is flipped, waits for the accept loop and every worker to drain.
fn spawn_server(mut config: Config) -> (std::net::SocketAddr, Arc<AtomicBool>, thread::JoinHandle<()>) {
    config.timeout_seconds = 1;
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], 0));
    let mut server = TestServer::bind(addr, config).expect("bind loopback port");
    let bound = server.local_addr().expect("local_addr");

    let shutdown = Arc::new(AtomicBool::new(false));
    let run_flag = Arc::clone(&shutdown);
    let handle = thread::spawn(move || server.run(&run_flag));

    (bound, shutdown, handle)
}

fn stop(shutdown: Arc<AtomicBool>, handle: thread::JoinHandle<()>) {
    shutdown.store(true, Ordering::SeqCst);
    handle.join().expect("server thread panicked");
}

/// Sends `request` and reads until the peer closes the connection (every
/// response carries `Connection: close`, so EOF marks the end of the reply).
fn roundtrip(addr: std::net::SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).expect("connect to server");
    stream.write_all(request).expect("write request");
    stream.shutdown(std::net::Shutdown::Write).ok();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).expect("read response");
    String::from_utf8_lossy(&response).into_owned()
}

#[test]
fn serves_a_plain_file_with_200() {
    let dir = tempfile::tempdir().unwrap();
    let body: String = Paragraph(3..5).fake();
    std::fs::write(dir.path().join("index.html"), &body).unwrap();

    let mut config = Config::default();
    config.document_root = dir.path().to_path_buf();
    let (addr, shutdown, handle) = spawn_server(config);

    let response = roundtrip(addr, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Content-Type: text/html"));
    assert!(response.ends_with(body.as_str()));

    stop(shutdown, handle);
}

#[test]
fn head_request_omits_the_body() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), b"hello from a HEAD test").unwrap();

    let mut config = Config::default();
    config.document_root = dir.path().to_path_buf();
    let (addr, shutdown, handle) = spawn_server(config);

    let response = roundtrip(addr, b"HEAD / HTTP/1.1\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Content-Length: 23"));
    assert!(response.ends_with("\r\n\r\n"));

    stop(shutdown, handle);
}

#[test]
fn missing_resource_yields_404() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.document_root = dir.path().to_path_buf();
    let (addr, shutdown, handle) = spawn_server(config);

    let response = roundtrip(addr, b"GET /never-written HTTP/1.1\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));

    stop(shutdown, handle);
}

#[test]
fn path_traversal_is_rejected_with_403() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.document_root = dir.path().to_path_buf();
    let (addr, shutdown, handle) = spawn_server(config);

    let response = roundtrip(addr, b"GET /../../../etc/passwd HTTP/1.1\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 403 Forbidden\r\n"));

    stop(shutdown, handle);
}

#[test]
fn second_request_for_the_same_file_is_a_cache_hit() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), b"cached body").unwrap();

    let mut config = Config::default();
    config.document_root = dir.path().to_path_buf();
    config.num_workers = 1;
    let (addr, shutdown, handle) = spawn_server(config);

    let first = roundtrip(addr, b"GET / HTTP/1.1\r\n\r\n");
    let second = roundtrip(addr, b"GET / HTTP/1.1\r\n\r\n");
    assert!(first.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(second.starts_with("HTTP/1.1 200 OK\r\n"));

    stop(shutdown, handle);
}

/// Saturates a single-thread, single-slot worker with a connection that never
/// finishes sending its request line, then shows that a queue that's already
/// full gets answered with an inline 503 instead of being left to hang.
#[test]
fn an_overloaded_worker_answers_with_503() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), b"hi").unwrap();

    let mut config = Config::default();
    config.document_root = dir.path().to_path_buf();
    config.num_workers = 1;
    config.threads_per_worker = 1;
    config.max_queue_size = 1;
    let (addr, shutdown, handle) = spawn_server(config);

    // Occupies the one worker thread: the handler blocks in `read` waiting
    // for a request line that never arrives.
    let mut stalled_a = TcpStream::connect(addr).expect("connect a");
    stalled_a.write_all(b"GET / HTTP/1.1\r\n").unwrap();
    thread::sleep(Duration::from_millis(150));

    // Occupies the worker's one-slot internal task queue.
    let mut stalled_b = TcpStream::connect(addr).expect("connect b");
    stalled_b.write_all(b"GET / HTTP/1.1\r\n").unwrap();
    thread::sleep(Duration::from_millis(150));

    // Both the admission queue and the task queue are now full; this one
    // gets bounced with an inline 503 rather than queued.
    let response = roundtrip(addr, b"GET / HTTP/1.1\r\n\r\n");
    assert!(
        response.starts_with("HTTP/1.1 503 Service Unavailable\r\n"),
        "expected 503, got: {response}"
    );

    drop(stalled_a);
    drop(stalled_b);
    stop(shutdown, handle);
}
