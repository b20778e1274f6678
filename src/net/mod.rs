//! Trait abstractions over TCP sockets, kept at arm's length from
//! `std::net` so the handler and test suite can run against a mock stream.

pub mod tcp_listener;
pub mod tcp_stream;

pub use tcp_listener::TcpListener;
pub use tcp_stream::TcpStream;
