use crate::error::{Error, Result};
use crate::handler::{ConnectionHandler, Disposition};
use crate::reactor::event::{Event, Events, Token};
use crate::reactor::registry::{Entry, Registry, Role};
use crate::reactor::socket::{accept_connection, take_error};

use libc::{ECONNABORTED, EINTR};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CloseReason {
    Failed,
    HungUp,
    Handler,
}

/// Single-threaded, edge-triggered accept and dispatch loop.
///
/// Built by [`ServerBuilder`](crate::ServerBuilder) once every listening
/// socket is registered.
#[derive(Debug)]
pub struct Server<H> {
    registry: Registry,
    handler: H,
    max_events: usize,
}

impl<H: ConnectionHandler> Server<H> {
    pub(crate) fn new(registry: Registry, handler: H, max_events: usize) -> Self {
        Self {
            registry,
            handler,
            max_events,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn listener_count(&self) -> usize {
        self.registry.listener_count()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    /// Wait batch size used by [`Self::run`].
    pub fn max_events(&self) -> usize {
        self.max_events
    }

    /// Runs the dispatch loop until a fatal error.
    pub fn run(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(self.max_events);

        info!(
            listeners = self.listener_count(),
            max_events = self.max_events,
            "entering dispatch loop"
        );

        loop {
            self.turn(&mut events)?;
        }
    }

    /// Blocks for one batch of events and dispatches it.
    ///
    /// Returns the number of events received.
    pub fn turn(&mut self, events: &mut Events) -> Result<usize> {
        self.poll(events, None)
    }

    /// Like [`Self::turn`], but gives up after `timeout`.
    ///
    /// With `None` the wait is infinite and an empty batch is a fatal
    /// [`Error::EmptyWait`]; with a timeout an empty batch is returned as 0.
    pub fn poll(&mut self, events: &mut Events, timeout: Option<Duration>) -> Result<usize> {
        let n_events = self.registry.wait(events, timeout).map_err(Error::Wait)?;

        if n_events == 0 {
            return match timeout {
                Some(_) => Ok(0),
                None => Err(Error::EmptyWait),
            };
        }

        for event in events.iter().copied() {
            self.dispatch(event)?;
        }

        Ok(n_events)
    }

    fn dispatch(&mut self, event: Event) -> Result<()> {
        let token = event.token();

        match self.registry.role(token) {
            Some(Role::Listener) => self.handle_listener(event),
            Some(Role::Connection) => {
                self.handle_connection(event);
                Ok(())
            }
            None => {
                trace!(%token, "dropping event for closed descriptor");
                Ok(())
            }
        }
    }

    fn handle_listener(&mut self, event: Event) -> Result<()> {
        let token = event.token();

        if event.is_error() {
            if let Some(entry) = self.registry.remove(token) {
                let fd = entry.raw_fd();
                let err = Error::Listener {
                    fd,
                    source: take_error(fd).ok().flatten(),
                };
                error!("{}; dropping listener", err.report());
            }

            if self.registry.listener_count() == 0 {
                return Err(Error::ListenersExhausted);
            }

            return Ok(());
        }

        self.drain_accept(token);

        Ok(())
    }

    /// Accepts connections until the listener reports would-block.
    ///
    /// A single edge may stand for any number of queued connections; any left
    /// in the backlog here would never be signalled again. Returns the number
    /// of connections registered.
    fn drain_accept(&mut self, token: Token) -> usize {
        let listener: RawFd = match self.registry.get_mut(token) {
            Some(Entry::Listener(fd)) => fd.as_raw_fd(),
            _ => return 0,
        };

        let mut accepted = 0;

        loop {
            let (fd, peer) = match accept_connection(listener) {
                Ok(connection) => connection,
                Err(err) if matches!(err.raw_os_error(), Some(ECONNABORTED | EINTR)) => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(source) => {
                    let err = Error::Accept {
                        fd: listener,
                        source,
                    };
                    error!("{}", err.report());
                    break;
                }
            };

            let raw = fd.as_raw_fd();
            let connection_token = match self.registry.add_connection(fd, listener, peer) {
                Ok(connection_token) => connection_token,
                Err(err) => {
                    warn!("{}; dropping connection", err.report());
                    continue;
                }
            };

            accepted += 1;
            debug!(listener, fd = raw, token = %connection_token, peer = ?peer, "accepted connection");

            if let Some(Entry::Connection(connection)) = self.registry.get_mut(connection_token) {
                self.handler.on_open(connection);
            }
        }

        trace!(listener, accepted, "accept queue drained");

        accepted
    }

    fn handle_connection(&mut self, event: Event) {
        let token = event.token();

        if event.is_error() {
            self.close_connection(token, CloseReason::Failed);
            return;
        }

        if event.is_hangup() {
            self.close_connection(token, CloseReason::HungUp);
            return;
        }

        let disposition = match self.registry.get_mut(token) {
            Some(Entry::Connection(connection)) => {
                if event.is_read_closed() {
                    connection.mark_read_closed();
                }
                self.handler.on_readable(connection)
            }
            _ => return,
        };

        if disposition == Disposition::Close {
            self.close_connection(token, CloseReason::Handler);
        }
    }

    fn close_connection(&mut self, token: Token, reason: CloseReason) {
        let Some(Entry::Connection(connection)) = self.registry.remove(token) else {
            return;
        };

        let fd = connection.as_raw_fd();

        match reason {
            CloseReason::Failed => {
                let err = Error::Connection {
                    fd,
                    source: take_error(fd).ok().flatten(),
                };
                error!("{}", err.report());
            }
            CloseReason::HungUp => info!(fd, %token, "connection hung up"),
            CloseReason::Handler => debug!(fd, %token, "connection closed"),
        }

        self.handler.on_close(&connection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::DiscardHandler;

    use libc::{EPOLLERR, EPOLLHUP, EPOLLIN};
    use std::net::{TcpListener, TcpStream};
    use std::os::fd::OwnedFd;
    use std::sync::{Arc, Mutex};
    use tracing::Level;
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::{Context, SubscriberExt};

    /// Collects the level of every event emitted while installed.
    struct Levels(Arc<Mutex<Vec<Level>>>);

    impl<S: tracing::Subscriber> Layer<S> for Levels {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            self.0.lock().unwrap().push(*event.metadata().level());
        }
    }

    fn levels_during(f: impl FnOnce()) -> Vec<Level> {
        let levels = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(Levels(levels.clone()));

        tracing::subscriber::with_default(subscriber, f);

        let collected = levels.lock().unwrap().clone();
        collected
    }

    /// Registers the server side of a loopback connection by hand.
    fn connect(server: &mut Server<DiscardHandler>) -> (TcpStream, Token) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, peer) = listener.accept().unwrap();
        stream.set_nonblocking(true).unwrap();

        let token = server
            .registry
            .add_connection(OwnedFd::from(stream), listener.as_raw_fd(), Some(peer))
            .unwrap();

        (client, token)
    }

    fn server_with_listeners(count: usize) -> (Server<DiscardHandler>, Vec<Token>) {
        let mut registry = Registry::new().unwrap();
        let tokens = (0..count)
            .map(|_| {
                let listener = TcpListener::bind("127.0.0.1:0").unwrap();
                listener.set_nonblocking(true).unwrap();
                registry.add_listener(OwnedFd::from(listener)).unwrap()
            })
            .collect();

        (Server::new(registry, DiscardHandler, 8), tokens)
    }

    #[test]
    fn failed_listener_is_dropped_while_others_remain() {
        let (mut server, tokens) = server_with_listeners(2);

        server.dispatch(Event::new(tokens[0], EPOLLERR as u32)).unwrap();

        assert_eq!(server.listener_count(), 1);
        assert_eq!(server.registry().role(tokens[0]), None);
        assert_eq!(server.registry().role(tokens[1]), Some(Role::Listener));
    }

    #[test]
    fn losing_the_last_listener_is_fatal() {
        let (mut server, tokens) = server_with_listeners(2);

        server.dispatch(Event::new(tokens[0], EPOLLERR as u32)).unwrap();
        let err = server.dispatch(Event::new(tokens[1], EPOLLERR as u32)).unwrap_err();

        assert!(matches!(err, Error::ListenersExhausted));
        assert!(err.is_fatal());
        assert_eq!(server.listener_count(), 0);
    }

    #[test]
    fn events_for_unknown_tokens_are_dropped() {
        let (mut server, tokens) = server_with_listeners(1);

        server.dispatch(Event::new(Token(u64::MAX), EPOLLIN as u32)).unwrap();
        server.dispatch(Event::new(tokens[0], EPOLLERR as u32)).unwrap_err();
        // A second error edge for the removed listener is stale.
        server.dispatch(Event::new(tokens[0], EPOLLERR as u32)).unwrap();

        assert_eq!(server.listener_count(), 0);
    }

    #[test]
    fn readable_listener_with_empty_backlog_accepts_nothing() {
        let (mut server, tokens) = server_with_listeners(1);

        server.dispatch(Event::new(tokens[0], EPOLLIN as u32)).unwrap();

        assert_eq!(server.connection_count(), 0);
        assert_eq!(server.listener_count(), 1);
    }

    #[test]
    fn bounded_wait_without_events_is_not_an_error() {
        let (mut server, _) = server_with_listeners(1);
        let mut events = Events::with_capacity(4);

        let n = server
            .poll(&mut events, Some(Duration::from_millis(10)))
            .unwrap();

        assert_eq!(n, 0);
    }

    #[test]
    fn hangup_closes_with_an_informational_log() {
        let (mut server, _) = server_with_listeners(1);
        let (_client, token) = connect(&mut server);

        let levels = levels_during(|| {
            server.dispatch(Event::new(token, EPOLLHUP as u32)).unwrap();
        });

        assert_eq!(levels, vec![Level::INFO]);
        assert_eq!(server.connection_count(), 0);
    }

    #[test]
    fn socket_error_closes_with_an_error_log() {
        let (mut server, _) = server_with_listeners(1);
        let (_client, token) = connect(&mut server);

        let levels = levels_during(|| {
            server
                .dispatch(Event::new(token, (EPOLLERR | EPOLLHUP) as u32))
                .unwrap();
        });

        assert_eq!(levels, vec![Level::ERROR]);
        assert_eq!(server.connection_count(), 0);
    }

    #[test]
    fn handler_close_is_logged_at_debug() {
        let (mut server, _) = server_with_listeners(1);
        let (client, token) = connect(&mut server);
        drop(client);

        // Wait for the FIN so the handler reads end of stream.
        let mut events = Events::with_capacity(4);
        while server.registry.wait(&mut events, Some(Duration::from_secs(2))).unwrap() == 0 {}

        let levels = levels_during(|| {
            server.dispatch(Event::new(token, EPOLLIN as u32)).unwrap();
        });

        assert_eq!(levels, vec![Level::DEBUG]);
        assert_eq!(server.connection_count(), 0);
    }
}
