use crate::error::{Error, Result};
use crate::reactor::event::{Event, Events, Token};
use crate::reactor::io::Connection;
use crate::reactor::socket::cvt;

use libc::{
    EINTR, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLLET, EPOLLIN, EPOLLRDHUP,
    epoll_create1, epoll_ctl, epoll_wait,
};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

const LISTENER_INTEREST: u32 = (EPOLLIN | EPOLLET) as u32;
const CONNECTION_INTEREST: u32 = (EPOLLIN | EPOLLRDHUP | EPOLLET) as u32;

/// What a registered descriptor is, fixed when it is registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Listener,
    Connection,
}

pub(crate) enum Entry {
    Listener(OwnedFd),
    Connection(Connection),
}

impl Entry {
    pub(crate) fn role(&self) -> Role {
        match self {
            Entry::Listener(_) => Role::Listener,
            Entry::Connection(_) => Role::Connection,
        }
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        match self {
            Entry::Listener(fd) => fd.as_raw_fd(),
            Entry::Connection(connection) => connection.as_raw_fd(),
        }
    }
}

/// The process epoll instance and every descriptor registered with it.
///
/// Registrations are edge-triggered with read interest. The registry owns the
/// registered descriptors: removing an entry deregisters it, dropping the
/// entry closes it, and dropping the registry releases everything.
pub struct Registry {
    epoll: OwnedFd,
    entries: HashMap<Token, Entry>,
    next_token: u64,
    listeners: usize,
}

impl Registry {
    pub fn new() -> Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(Error::RegistryCreate(io::Error::last_os_error()));
        }

        Ok(Self {
            epoll: unsafe { OwnedFd::from_raw_fd(epoll) },
            entries: HashMap::new(),
            next_token: 1,
            listeners: 0,
        })
    }

    /// Arms edge-triggered read notification for a listening socket.
    ///
    /// The caller must already have made `fd` non-blocking.
    pub fn add_listener(&mut self, fd: OwnedFd) -> Result<Token> {
        let raw = fd.as_raw_fd();
        let token = self.next_token();

        self.arm(raw, token, LISTENER_INTEREST)
            .map_err(|source| Error::Registration { fd: raw, source })?;

        self.entries.insert(token, Entry::Listener(fd));
        self.listeners += 1;

        Ok(token)
    }

    /// Arms edge-triggered read and peer-shutdown notification for an
    /// accepted connection. On failure the descriptor is closed.
    pub(crate) fn add_connection(
        &mut self,
        fd: OwnedFd,
        listener: RawFd,
        peer: Option<SocketAddr>,
    ) -> Result<Token> {
        let raw = fd.as_raw_fd();
        let token = self.next_token();

        self.arm(raw, token, CONNECTION_INTEREST)
            .map_err(|source| Error::Registration { fd: raw, source })?;

        self.entries
            .insert(token, Entry::Connection(Connection::new(fd, token, listener, peer)));

        Ok(token)
    }

    /// Deregisters `token` and hands back its entry.
    ///
    /// A failing `EPOLL_CTL_DEL` is ignored: closing the descriptor removes it
    /// from the interest list anyway.
    pub(crate) fn remove(&mut self, token: Token) -> Option<Entry> {
        let entry = self.entries.remove(&token)?;

        unsafe {
            epoll_ctl(
                self.epoll.as_raw_fd(),
                EPOLL_CTL_DEL,
                entry.raw_fd(),
                ptr::null_mut(),
            );
        }

        if entry.role() == Role::Listener {
            self.listeners -= 1;
        }

        Some(entry)
    }

    pub(crate) fn get_mut(&mut self, token: Token) -> Option<&mut Entry> {
        self.entries.get_mut(&token)
    }

    /// Blocks until at least one registered descriptor is ready, or until
    /// `timeout` elapses. `None` waits forever.
    ///
    /// Interrupted waits are retried. Returns the number of events written
    /// into `events`.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = match timeout {
            Some(duration) => duration.as_millis().min(i32::MAX as u128) as i32,
            None => -1,
        };

        loop {
            let n_events = unsafe {
                epoll_wait(
                    self.epoll.as_raw_fd(),
                    events.as_mut_ptr(),
                    events.capacity() as i32,
                    timeout_ms,
                )
            };

            if n_events >= 0 {
                events.set_len(n_events as usize);
                return Ok(n_events as usize);
            }

            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(EINTR) {
                events.set_len(0);
                return Err(err);
            }
        }
    }

    pub fn role(&self, token: Token) -> Option<Role> {
        self.entries.get(&token).map(Entry::role)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
    }

    pub fn connection_count(&self) -> usize {
        self.entries.len() - self.listeners
    }

    fn next_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;

        token
    }

    fn arm(&self, fd: RawFd, token: Token, interest: u32) -> io::Result<()> {
        let mut event = Event::new(token, interest);

        cvt(unsafe { epoll_ctl(self.epoll.as_raw_fd(), EPOLL_CTL_ADD, fd, event.raw_mut()) })?;

        Ok(())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("epoll", &self.epoll)
            .field("listeners", &self.listeners)
            .field("connections", &self.connection_count())
            .finish()
    }
}
