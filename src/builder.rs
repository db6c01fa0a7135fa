//! Fluent builder for [`Server`] construction.
//!
//! Building is the registration phase of startup: it creates the epoll
//! instance, forces every listener non-blocking and arms it. Any failure here
//! is fatal and happens before readiness is announced.

use crate::activation::listen_fds::ListenFds;
use crate::error::Result;
use crate::handler::{ConnectionHandler, DiscardHandler};
use crate::reactor::core::Server;
use crate::reactor::registry::Registry;
use crate::reactor::socket::set_nonblocking;

use std::os::fd::AsRawFd;
use tracing::info;

/// Events fetched per wait call unless configured otherwise.
pub const DEFAULT_MAX_EVENTS: usize = 256;

/// Builder for [`Server`] instances.
///
/// # Example
/// ```ignore
/// let listen_fds = ListenFds::from_env(true)?;
/// let server = ServerBuilder::new().max_events(64).build(listen_fds)?;
/// ```
#[derive(Debug)]
pub struct ServerBuilder<H = DiscardHandler> {
    max_events: usize,
    handler: H,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    /// Creates a builder with the default batch size and a [`DiscardHandler`].
    pub fn new() -> Self {
        Self {
            max_events: DEFAULT_MAX_EVENTS,
            handler: DiscardHandler,
        }
    }
}

impl<H: ConnectionHandler> ServerBuilder<H> {
    /// Sets the maximum number of events fetched by one wait call.
    pub fn max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events.max(1);
        self
    }

    /// Replaces the protocol handler.
    pub fn handler<T: ConnectionHandler>(self, handler: T) -> ServerBuilder<T> {
        ServerBuilder {
            max_events: self.max_events,
            handler,
        }
    }

    /// Registers every listener in a fresh registry.
    ///
    /// # Errors
    /// [`Error::RegistryCreate`](crate::Error::RegistryCreate),
    /// [`Error::DescriptorConfig`](crate::Error::DescriptorConfig) or
    /// [`Error::Registration`](crate::Error::Registration); the registry and
    /// every descriptor are released on failure.
    pub fn build(self, listen_fds: ListenFds) -> Result<Server<H>> {
        let mut registry = Registry::new()?;

        for fd in listen_fds {
            let raw = fd.as_raw_fd();

            set_nonblocking(raw)?;
            let token = registry.add_listener(fd)?;

            info!(fd = raw, %token, "listening");
        }

        Ok(Server::new(registry, self.handler, self.max_events))
    }
}
