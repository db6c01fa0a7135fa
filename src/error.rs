//! Error taxonomy for the activation and dispatch engine.
//!
//! Every fallible step returns a [`Result`] and the caller propagates with `?`.
//! Whether a failure aborts the process or is contained to one descriptor is
//! answered by [`Error::is_fatal`].

use std::error::Error as _;
use std::fmt;
use std::io;
use std::os::fd::RawFd;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while acquiring descriptors, setting up the registry or
/// dispatching readiness events.
#[derive(Debug, Error)]
pub enum Error {
    /// The inherited descriptor count could not be determined.
    #[error("failed to determine inherited descriptors: {reason}")]
    Acquisition { reason: String },

    /// The supervisor passed no listening sockets.
    #[error("no listening sockets were passed")]
    NoDescriptors,

    /// An inherited descriptor is not a listening stream socket.
    #[error("file descriptor {fd} is not a listening stream socket: {reason}")]
    InvalidDescriptor { fd: RawFd, reason: String },

    /// Status flags could not be read or written.
    #[error("could not mark descriptor {fd} as non-blocking")]
    DescriptorConfig {
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    #[error("failed to create epoll instance")]
    RegistryCreate(#[source] io::Error),

    #[error("failed to add descriptor {fd} to epoll instance")]
    Registration {
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    /// The error bit was raised on a listening socket.
    #[error("an error occurred on listening socket {fd}")]
    Listener {
        fd: RawFd,
        #[source]
        source: Option<io::Error>,
    },

    #[error("failed to accept connection on listening socket {fd}")]
    Accept {
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    /// The error bit was raised on an accepted connection.
    #[error("an error occurred on connection socket {fd}")]
    Connection {
        fd: RawFd,
        #[source]
        source: Option<io::Error>,
    },

    #[error("failure while waiting for events")]
    Wait(#[source] io::Error),

    /// An infinite wait returned without any event.
    #[error("wait returned zero events with an infinite timeout")]
    EmptyWait,

    /// Every listening socket has failed and been dropped.
    #[error("no listening sockets remain")]
    ListenersExhausted,
}

impl Error {
    /// Returns `true` when the failure must terminate the process.
    ///
    /// Listener, accept and connection failures are contained to a single
    /// descriptor.
    /// A registration failure is fatal during setup only; the accept path
    /// handles it locally and never propagates it.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::Listener { .. } | Error::Accept { .. } | Error::Connection { .. }
        )
    }

    pub fn report(&self) -> Report<'_> {
        Report(self)
    }
}

/// Displays an error followed by its chain of sources, `: `-separated.
#[derive(Debug)]
pub struct Report<'a>(&'a Error);

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut source = self.0.source();
        while let Some(cause) = source {
            write!(f, ": {cause}")?;
            source = cause.source();
        }

        Ok(())
    }
}
