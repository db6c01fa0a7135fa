//! Protocol collaborator interface.
//!
//! The dispatch loop owns descriptors and readiness; everything that happens
//! to the bytes of a connection belongs to a [`ConnectionHandler`].

use crate::reactor::io::Connection;

use std::io;
use tracing::debug;

/// What the dispatch loop should do with a connection after a read event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Leave the connection armed; more data is expected.
    Keep,
    /// Deregister and close the connection.
    Close,
}

/// Per-connection protocol logic.
///
/// Registrations are edge-triggered: `on_readable` must read until
/// [`io::ErrorKind::WouldBlock`] (or end of stream) before returning, or the
/// remaining bytes will never be signalled again. Implementations must not
/// block.
///
/// A peer that shuts down its writing half is not closed by the loop: reads
/// reach end of stream, [`Connection::is_read_closed`] turns true, and the
/// connection stays registered until `on_readable` returns
/// [`Disposition::Close`] or the socket errors or fully hangs up.
pub trait ConnectionHandler {
    /// A connection was accepted and registered.
    fn on_open(&mut self, _connection: &Connection) {}

    /// The connection has bytes to read.
    fn on_readable(&mut self, connection: &mut Connection) -> Disposition;

    /// The connection is about to be closed. Called once per opened connection.
    fn on_close(&mut self, _connection: &Connection) {}
}

/// Drains and discards everything a peer sends.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardHandler;

impl ConnectionHandler for DiscardHandler {
    fn on_readable(&mut self, connection: &mut Connection) -> Disposition {
        let mut buf = [0u8; 4096];

        loop {
            match connection.read(&mut buf) {
                Ok(0) => return Disposition::Close,
                Ok(n) => debug!(token = %connection.token(), bytes = n, "discarded"),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Disposition::Keep,
                Err(err) => {
                    debug!(token = %connection.token(), error = %err, "read failed");
                    return Disposition::Close;
                }
            }
        }
    }
}
