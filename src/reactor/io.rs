use crate::reactor::event::Token;

use libc::{EINTR, read, write};
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

/// An accepted, established connection.
///
/// The descriptor is non-blocking and closes when the value is dropped.
#[derive(Debug)]
pub struct Connection {
    fd: OwnedFd,
    token: Token,
    listener: RawFd,
    peer: Option<SocketAddr>,
    read_closed: bool,
}

impl Connection {
    pub(crate) fn new(
        fd: OwnedFd,
        token: Token,
        listener: RawFd,
        peer: Option<SocketAddr>,
    ) -> Self {
        Self {
            fd,
            token,
            listener,
            peer,
            read_closed: false,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// The listening descriptor this connection was accepted on.
    pub fn listener(&self) -> RawFd {
        self.listener
    }

    /// Peer address, for internet sockets.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// The peer has shut down its writing half; reads will end at end of
    /// stream, but the connection stays open until the handler closes it.
    pub fn is_read_closed(&self) -> bool {
        self.read_closed
    }

    pub(crate) fn mark_read_closed(&mut self) {
        self.read_closed = true;
    }

    /// Reads available bytes without blocking.
    ///
    /// Returns `Ok(0)` at end of stream and `ErrorKind::WouldBlock` once the
    /// socket buffer is drained.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let res = unsafe { read(self.as_raw_fd(), buf.as_mut_ptr() as *mut _, buf.len()) };

            if res >= 0 {
                return Ok(res as usize);
            }

            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(EINTR) {
                return Err(err);
            }
        }
    }

    /// Writes as much of `buf` as the socket accepts without blocking.
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        loop {
            let res = unsafe { write(self.as_raw_fd(), buf.as_ptr() as *const _, buf.len()) };

            if res >= 0 {
                return Ok(res as usize);
            }

            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(EINTR) {
                return Err(err);
            }
        }
    }
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for Connection {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
