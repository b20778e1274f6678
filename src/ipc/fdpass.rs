//! Passing an open file descriptor across the `fork` boundary via
//! `SCM_RIGHTS` ancillary data over an `AF_UNIX SOCK_DGRAM` socket pair.
//!
//! `original_source/` never does this: `master.c` forks every worker in a
//! loop before its accept loop runs, so the raw `int client_fd` its
//! `connection_queue_t` carries is only ever valid in the admitter's own
//! descriptor table — a bug this crate does not reproduce. A `socketpair`
//! created once, before any `fork`, is itself inherited by every child the
//! same way the shared-memory region and named semaphores are, so both
//! ends stay valid everywhere without any name or re-attach step.

use std::io;
use std::mem::size_of;
use std::os::fd::RawFd;

/// Creates a connected pair of `AF_UNIX`/`SOCK_DGRAM` descriptors. Datagram
/// mode keeps each `sendmsg` a single, self-contained unit of ancillary
/// data — no framing needed to tell where one ends and the next begins,
/// which matters here because an admission-queue slot and its fd must
/// arrive as one atomic unit.
pub fn socketpair() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as RawFd; 2];
    // SAFETY: `fds` is a valid 2-element buffer for `socketpair(2)` to fill.
    let rc = unsafe {
        libc::socketpair(libc::AF_UNIX, libc::SOCK_DGRAM, 0, fds.as_mut_ptr())
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((fds[0], fds[1]))
}

/// Sends `payload` (the fixed-size connection record) as the datagram body
/// and `fd` as `SCM_RIGHTS` ancillary data over `socket`.
///
/// `fd` remains valid to close in the caller immediately after this
/// returns `Ok`: `sendmsg` takes its own reference to the open file
/// description at call time, so the kernel keeps it alive until some
/// `recvmsg` call claims it, independent of what the sender does with its
/// own copy afterward.
pub fn send_with_fd(socket: RawFd, payload: &[u8], fd: RawFd) -> io::Result<()> {
    let mut iov = libc::iovec {
        iov_base: payload.as_ptr() as *mut libc::c_void,
        iov_len: payload.len(),
    };

    let cmsg_space = unsafe { libc::CMSG_SPACE(size_of::<RawFd>() as u32) } as usize;
    let mut cmsg_buf = vec![0u8; cmsg_space];

    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = cmsg_space as _;

    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        debug_assert!(!cmsg.is_null());
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(size_of::<RawFd>() as u32) as _;
        std::ptr::write(libc::CMSG_DATA(cmsg) as *mut RawFd, fd);
    }

    // SAFETY: `msg` points at valid, live buffers for the duration of the call.
    let rc = unsafe { libc::sendmsg(socket, &msg, 0) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Receives one datagram of exactly `size_of::<T>()` bytes plus one
/// `SCM_RIGHTS` fd from `socket`, matching what [`send_with_fd`] sent.
///
/// Blocks until a datagram is available. Returns the raw payload bytes
/// (the caller reinterprets them as its POD record type) and the received,
/// now-owned, file descriptor.
pub fn recv_with_fd(socket: RawFd, payload_len: usize) -> io::Result<(Vec<u8>, RawFd)> {
    let mut payload = vec![0u8; payload_len];
    let mut iov = libc::iovec {
        iov_base: payload.as_mut_ptr() as *mut libc::c_void,
        iov_len: payload.len(),
    };

    let cmsg_space = unsafe { libc::CMSG_SPACE(size_of::<RawFd>() as u32) } as usize;
    let mut cmsg_buf = vec![0u8; cmsg_space];

    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = cmsg_space as _;

    // SAFETY: `msg` points at valid, live buffers sized for one payload and
    // one `SCM_RIGHTS` control message.
    let rc = unsafe { libc::recvmsg(socket, &mut msg, 0) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    if rc as usize != payload_len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "short read on admission queue fd-passing datagram",
        ));
    }

    let fd = unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        if cmsg.is_null()
            || (*cmsg).cmsg_level != libc::SOL_SOCKET
            || (*cmsg).cmsg_type != libc::SCM_RIGHTS
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "admission queue datagram carried no SCM_RIGHTS fd",
            ));
        }
        std::ptr::read(libc::CMSG_DATA(cmsg) as *const RawFd)
    };

    Ok((payload, fd))
}

/// Closes `fd`. A thin wrapper so callers don't need a direct `libc`
/// dependency of their own just to clean up a sent descriptor.
pub fn close(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    #[test]
    fn round_trips_a_payload_and_an_fd() {
        let (tx, rx) = socketpair().unwrap();
        let tmp = tempfile::tempfile().unwrap();
        let source_fd = tmp.as_raw_fd();

        let payload = *b"hello!!!";
        send_with_fd(tx, &payload, source_fd).unwrap();

        let (received, fd) = recv_with_fd(rx, payload.len()).unwrap();
        assert_eq!(received, payload);
        assert!(fd >= 0);

        // the received fd is a distinct, independently closable duplicate.
        close(fd);
        close(tx);
        close(rx);
    }
}
