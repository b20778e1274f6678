//! Request handler state machine (spec §4.4, C7).
//!
//! `Read → Parse → Validate → Resolve → Stat → ServeDir/ServeFile →
//! Fail(kind) → Finalize`, written as a sequence of early returns rather
//! than an explicit state enum — each state in the spec's table corresponds
//! to one block below, in the same order, and every exit funnels through
//! [`finalize`] so statistics and the access log line are touched exactly
//! once per connection.

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crate::access_log::AccessLog;
use crate::cache::Cache;
use crate::conn::ConnectionHandle;
use crate::config::Config;
use crate::date::rfc1123;
use crate::mime::media_type_for_path;
use crate::net::TcpStream;
use crate::parser::{Method, RequestLine, Status, Version};
use crate::stats::Stats;

/// Identifies this server in the `Server` response header. Not one of the
/// recognized config keys (spec §6 lists none for it) — a fixed literal, the
/// way it can't reasonably be anything else on a single-purpose file server.
pub const SERVER_IDENTIFIER: &str = "vellum/0.1";

/// `Read` never accumulates more than this many bytes before the request is
/// treated as malformed, independent of how slowly or maliciously a client
/// trickles bytes in.
const MAX_REQUEST_BYTES: usize = 8 * 1024;

/// Shared, read-only resources every handler invocation needs. One instance
/// per worker runtime, held behind `Arc` and passed by reference per
/// connection.
pub struct HandlerContext {
    pub config: Arc<Config>,
    pub cache: Arc<Cache>,
    pub stats: Arc<Stats>,
    pub access_log: Arc<AccessLog>,
}

/// The result of running the state machine to a terminal state: enough
/// about the request to finalize statistics and the access log even when
/// the machine bailed out early on a malformed request.
struct Outcome {
    status: Status,
    bytes_written: u64,
    method: Method,
    target: String,
    version: Version,
}

/// Runs the full state machine for one connection: reads a request, serves
/// a response, records statistics and an access log line, and closes the
/// stream. Never panics on a malformed or hostile request — every failure
/// path answers with a status code instead.
pub fn handle<S: TcpStream + Read + Write>(conn: ConnectionHandle<S>, ctx: &HandlerContext) {
    let ConnectionHandle {
        mut stream,
        peer_addr,
        ..
    } = conn;

    let started = Instant::now();
    let now = SystemTime::now();

    ctx.stats.begin_request();

    let _ = stream.set_read_timeout(Some(Duration::from_secs(
        ctx.config.timeout_seconds as u64,
    )));

    let outcome = run(&mut stream, ctx, now);

    let _ = stream.shutdown(std::net::Shutdown::Both);

    finalize(ctx, peer_addr, now, started.elapsed(), &outcome);
}

fn run<S: Read + Write>(stream: &mut S, ctx: &HandlerContext, now: SystemTime) -> Outcome {
    // `Read`
    let bytes = match read_request(stream) {
        Ok(bytes) => bytes,
        Err(_) => return fail(stream, Status::BadRequest, Method::Get, String::new(), Version::H1_1, now),
    };

    // `Parse`
    let (line, host) = match RequestLine::parse(&bytes) {
        Ok(parsed) => parsed,
        Err(_) => return fail(stream, Status::BadRequest, Method::Get, String::new(), Version::H1_1, now),
    };
    let method = line.method;
    let version = line.version;
    let raw_target = line.target.to_string();
    let host = host.map(str::to_string);

    // `Validate`
    if !method.is_servable() {
        return fail(stream, Status::NotImplemented, method, raw_target, version, now);
    }
    let decoded_target = match percent_decode(&raw_target) {
        Some(decoded) => decoded,
        None => return fail(stream, Status::BadRequest, method, raw_target, version, now),
    };
    if decoded_target.contains("..") {
        return fail(stream, Status::Forbidden, method, decoded_target, version, now);
    }
    let target = if decoded_target.ends_with('/') {
        format!("{decoded_target}index.html")
    } else {
        decoded_target
    };

    // `Resolve`
    let path = resolve_path(&ctx.config, host.as_deref(), &target);

    // `Stat`
    let meta = match std::fs::metadata(&path) {
        Ok(meta) => meta,
        Err(e) => return fail(stream, status_for_io_error(&e), method, target, version, now),
    };

    // `ServeDir` (falls through to `ServeFile` below on success)
    let (file_path, size) = if meta.is_dir() {
        let index_path = path.join("index.html");
        match std::fs::metadata(&index_path) {
            Ok(m) if m.is_file() => (index_path, m.len()),
            _ => return fail(stream, Status::Forbidden, method, target, version, now),
        }
    } else {
        (path, meta.len())
    };

    // `ServeFile`
    serve_file(stream, ctx, &file_path, size, method, target, version, now)
}

/// Reads up to [`MAX_REQUEST_BYTES`] or until the header-terminating blank
/// line appears, whichever comes first.
fn read_request<S: Read>(stream: &mut S) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];
    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            if buf.is_empty() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "empty request",
                ));
            }
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }
    Ok(buf)
}

/// Percent-decodes a request target (spec §4.4: the `..` traversal check
/// must run "after URL-decoding"). `None` on a malformed escape — a `%` not
/// followed by two hex digits, or a decoded byte sequence that isn't valid
/// UTF-8 — which the caller turns into a 400 rather than guessing.
fn percent_decode(target: &str) -> Option<String> {
    let bytes = target.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes.get(i + 1..i + 3)?;
                let hi = (hex[0] as char).to_digit(16)?;
                let lo = (hex[1] as char).to_digit(16)?;
                out.push((hi * 16 + lo) as u8);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}

fn resolve_path(config: &Config, host: Option<&str>, target: &str) -> PathBuf {
    let root = match host {
        Some(host) => {
            let candidate = config.document_root.join(host);
            if candidate.is_dir() {
                candidate
            } else {
                config.document_root.clone()
            }
        }
        None => config.document_root.clone(),
    };
    root.join(target.trim_start_matches('/'))
}

fn status_for_io_error(e: &std::io::Error) -> Status {
    match e.kind() {
        std::io::ErrorKind::PermissionDenied => Status::Forbidden,
        _ => Status::NotFound,
    }
}

/// The cache-consulting, disk-reading, response-writing half of
/// `ServeFile`. Files at or under the per-file cache ceiling go through
/// [`Cache::get`]/[`Cache::put`]; larger files are read and streamed
/// directly, bypassing the cache entirely.
#[allow(clippy::too_many_arguments)]
fn serve_file<S: Write>(
    stream: &mut S,
    ctx: &HandlerContext,
    path: &Path,
    size: u64,
    method: Method,
    target: String,
    version: Version,
    now: SystemTime,
) -> Outcome {
    let cacheable = size <= crate::cache::DEFAULT_MAX_FILE_SIZE as u64;

    let body: Option<Arc<Vec<u8>>> = if cacheable {
        if let Some(hit) = ctx.cache.get(path) {
            ctx.stats.record_cache_hit();
            Some(hit)
        } else {
            ctx.stats.record_cache_miss();
            match std::fs::read(path) {
                Ok(data) => {
                    let data = Arc::new(data);
                    let _ = ctx.cache.put(path, (*data).clone());
                    Some(data)
                }
                Err(_) => None,
            }
        }
    } else {
        std::fs::read(path).ok().map(Arc::new)
    };

    match body {
        Some(data) => {
            let written = write_response(
                stream,
                version,
                Status::Ok,
                media_type_for_path(path),
                &data,
                method == Method::Head,
                now,
            );
            Outcome {
                status: Status::Ok,
                bytes_written: written,
                method,
                target,
                version,
            }
        }
        None => fail(stream, Status::NotFound, method, target, version, now),
    }
}

/// `Fail(kind)`: writes a canned status-line + minimal HTML body and
/// returns the `Outcome` for `Finalize`.
fn fail<S: Write>(
    stream: &mut S,
    status: Status,
    method: Method,
    target: String,
    version: Version,
    now: SystemTime,
) -> Outcome {
    let body = format!(
        "<html><body><h1>{} {}</h1></body></html>",
        status.code(),
        status.reason_phrase()
    );
    let written = write_response(stream, version, status, "text/html", body.as_bytes(), false, now);
    Outcome {
        status,
        bytes_written: written,
        method,
        target,
        version,
    }
}

/// Writes the status line, `Date`/`Server`/`Content-Type`/`Content-Length`/
/// `Connection: close` headers, and the body (unless `omit_body`, for
/// `HEAD`). Returns the number of body bytes actually written — 0 if the
/// header write itself failed, since a broken pipe is absorbed rather than
/// propagated (spec §4.4's failure semantics).
#[allow(clippy::too_many_arguments)]
fn write_response<S: Write>(
    stream: &mut S,
    version: Version,
    status: Status,
    content_type: &str,
    body: &[u8],
    omit_body: bool,
    now: SystemTime,
) -> u64 {
    let header = format!(
        "{} {}\r\nDate: {}\r\nServer: {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        version,
        status,
        rfc1123(now),
        SERVER_IDENTIFIER,
        content_type,
        body.len(),
    );

    if stream.write_all(header.as_bytes()).is_err() {
        return 0;
    }
    if omit_body {
        return 0;
    }
    if stream.write_all(body).is_err() {
        return 0;
    }
    body.len() as u64
}

/// Synthesizes a `503 Service Unavailable` directly, bypassing the state
/// machine entirely. Called from the rejecting site itself (spec §4.5's
/// admitter on a full admission queue, or a worker's main thread on a full
/// internal task queue — spec §4.2) rather than from [`handle`], since
/// neither caller ever reaches `Read`/`Parse`.
pub fn respond_service_unavailable<S: Write>(stream: &mut S, now: SystemTime) -> u64 {
    let body = format!(
        "<html><body><h1>{} {}</h1></body></html>",
        Status::ServiceUnavailable.code(),
        Status::ServiceUnavailable.reason_phrase()
    );
    write_response(
        stream,
        Version::H1_1,
        Status::ServiceUnavailable,
        "text/html",
        body.as_bytes(),
        false,
        now,
    )
}

/// `Finalize`: records statistics and emits one access-log line, whatever
/// state the handler actually terminated in.
fn finalize(ctx: &HandlerContext, peer_addr: SocketAddr, now: SystemTime, elapsed: Duration, outcome: &Outcome) {
    ctx.stats.record_request(outcome.status, outcome.bytes_written, elapsed);
    let _ = ctx.access_log.log(
        peer_addr.ip(),
        now,
        outcome.method,
        &outcome.target,
        outcome.version,
        outcome.status,
        outcome.bytes_written,
    );
}
