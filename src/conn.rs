//! The connection handle (spec §3): the unit of work that flows from the
//! admitter through the admission queue, into a worker's task queue, and
//! finally to [`crate::handler::handle`].

use std::net::SocketAddr;
use std::time::SystemTime;

use crate::net::TcpStream;

/// An accepted TCP connection plus the metadata the handler and access log
/// need and that isn't retrievable from the stream itself after the fact.
pub struct ConnectionHandle<S: TcpStream> {
    pub stream: S,
    pub peer_addr: SocketAddr,
    pub arrived_at: SystemTime,
}

impl<S: TcpStream> ConnectionHandle<S> {
    pub fn new(stream: S, peer_addr: SocketAddr, arrived_at: SystemTime) -> Self {
        ConnectionHandle {
            stream,
            peer_addr,
            arrived_at,
        }
    }
}
