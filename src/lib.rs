//! Socket-activated, edge-triggered network server core.
//!
//! The service manager hands this process a set of already-listening sockets.
//! They are validated, made non-blocking and registered with a single epoll
//! instance; readiness is announced; then one thread waits for events and
//! dispatches them until a fatal error.
//!
//! # Architecture
//!
//! - **ListenFds**: inherited listening sockets (`LISTEN_PID` / `LISTEN_FDS`)
//! - **Registry**: the epoll instance, owning every registered descriptor
//! - **Server**: accept draining, connection events and the dispatch loop
//! - **ConnectionHandler**: protocol logic for readable connections
//! - **ServerBuilder**: fluent construction and registration
//! - **SystemdNotifier**: the `READY=1` announcement

#[cfg(not(target_os = "linux"))]
compile_error!("fluxel requires Linux (epoll, accept4)");

pub mod activation;
mod builder;
mod error;
pub mod handler;
pub mod log;
pub mod process;
pub mod reactor;

pub use activation::listen_fds::{LISTEN_FDS_START, ListenFds};
pub use activation::notify::{ReadinessNotifier, SystemdNotifier};
pub use builder::{DEFAULT_MAX_EVENTS, ServerBuilder};
pub use error::{Error, Report, Result};
pub use handler::{ConnectionHandler, DiscardHandler, Disposition};
pub use reactor::core::Server;
pub use reactor::event::{Event, Events, Token};
pub use reactor::io::Connection;
pub use reactor::registry::{Registry, Role};
