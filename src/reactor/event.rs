use libc::{EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLRDHUP, epoll_event};
use std::fmt;

/// Identity of one registration, carried in the epoll user data.
///
/// Tokens are never reused, so an event that outlives its registration can
/// be recognised and dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub u64);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A readiness event delivered by a wait call.
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct Event(epoll_event);

impl Event {
    pub(crate) const EMPTY: Self = Self(epoll_event { events: 0, u64: 0 });

    pub(crate) fn new(token: Token, flags: u32) -> Self {
        Self(epoll_event {
            events: flags,
            u64: token.0,
        })
    }

    pub(crate) fn raw_mut(&mut self) -> *mut epoll_event {
        &mut self.0
    }

    pub fn token(&self) -> Token {
        Token(self.0.u64)
    }

    pub fn flags(&self) -> u32 {
        self.0.events
    }

    pub fn is_readable(&self) -> bool {
        self.flags() & EPOLLIN as u32 != 0
    }

    pub fn is_error(&self) -> bool {
        self.flags() & EPOLLERR as u32 != 0
    }

    pub fn is_hangup(&self) -> bool {
        self.flags() & EPOLLHUP as u32 != 0
    }

    /// The peer shut down its writing half.
    pub fn is_read_closed(&self) -> bool {
        self.flags() & EPOLLRDHUP as u32 != 0
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("token", &self.token())
            .field("readable", &self.is_readable())
            .field("error", &self.is_error())
            .field("hangup", &self.is_hangup())
            .field("read_closed", &self.is_read_closed())
            .finish()
    }
}

/// Scratch buffer filled by [`Registry::wait`](crate::reactor::registry::Registry::wait).
///
/// Owned by the dispatch loop and reused across iterations; its capacity is
/// the maximum batch size of one wait call.
pub struct Events {
    buffer: Vec<Event>,
    len: usize,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: vec![Event::EMPTY; capacity.max(1)],
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> + '_ {
        self.buffer.iter().take(self.len)
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut epoll_event {
        self.buffer.as_mut_ptr() as *mut epoll_event
    }

    pub(crate) fn set_len(&mut self, len: usize) {
        self.len = len.min(self.buffer.len());
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
