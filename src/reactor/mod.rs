//! Event-driven I/O reactor.
//!
//! This module provides the edge-triggered epoll engine:
//! - [`core`]: accept draining, connection events and the dispatch loop
//! - [`event`]: epoll event wrappers and the wait buffer
//! - [`registry`]: the epoll instance and its role-tagged registrations
//! - [`io`]: accepted connections
//! - [`socket`]: socket flags, validation and `accept4`

pub mod core;
pub mod event;
pub mod io;
pub mod registry;
pub mod socket;
