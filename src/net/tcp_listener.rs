//! Socket trait abstraction over a listening socket. See
//! [`super::tcp_stream`] for why only `std::net` is implemented.

use std::io::{Error, Result};
use std::net::SocketAddr;
use std::time::Duration;

use super::tcp_stream::TcpStream;

pub trait TcpListener<S: TcpStream> {
    fn bind(addr: SocketAddr) -> Result<Self>
    where
        Self: Sized;

    fn accept(&self) -> Result<(S, SocketAddr)>;

    fn local_addr(&self) -> Result<SocketAddr>;

    fn set_ttl(&self, ttl: u32) -> Result<()>;

    fn ttl(&self) -> Result<u32>;

    fn take_error(&self) -> Result<Option<Error>>;

    fn set_nonblocking(&self, nonblocking: bool) -> Result<()>;

    /// Bounds how long `accept` blocks when nothing is pending, `None` for
    /// no bound. The admitter (spec §4.5/§5: "admitter suspends only in
    /// accept") uses this instead of a non-blocking poll/sleep loop, so the
    /// single blocking call doubles as both the wait for a connection and
    /// the periodic wake-up to check for a shutdown request.
    fn set_accept_timeout(&self, timeout: Option<Duration>) -> Result<()>;
}

type STcpListener = std::net::TcpListener;
type STcpStream = std::net::TcpStream;

impl TcpListener<STcpStream> for STcpListener {
    #[inline]
    fn bind(addr: SocketAddr) -> Result<Self> {
        Self::bind(addr)
    }

    #[inline]
    fn accept(&self) -> Result<(STcpStream, SocketAddr)> {
        Self::accept(self)
    }

    #[inline]
    fn local_addr(&self) -> Result<SocketAddr> {
        Self::local_addr(self)
    }

    #[inline]
    fn set_ttl(&self, ttl: u32) -> Result<()> {
        Self::set_ttl(self, ttl)
    }

    #[inline]
    fn ttl(&self) -> Result<u32> {
        Self::ttl(self)
    }

    #[inline]
    fn take_error(&self) -> Result<Option<Error>> {
        Self::take_error(self)
    }

    #[inline]
    fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        Self::set_nonblocking(self, nonblocking)
    }

    fn set_accept_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        use std::os::fd::AsRawFd;

        let tv = match timeout {
            Some(d) => libc::timeval {
                tv_sec: d.as_secs() as libc::time_t,
                tv_usec: d.subsec_micros() as libc::suseconds_t,
            },
            None => libc::timeval {
                tv_sec: 0,
                tv_usec: 0,
            },
        };
        // SAFETY: `tv` is a valid, fully-initialized `timeval` for
        // `setsockopt(2)`, and `self.as_raw_fd()` names this listener's own
        // open socket for the duration of the call.
        let rc = unsafe {
            libc::setsockopt(
                self.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const libc::timeval as *const libc::c_void,
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(Error::last_os_error());
        }
        Ok(())
    }
}
