mod common;

use common::{Recorder, loopback_listener, turn_until};
use fluxel::{Events, ListenFds, Role, ServerBuilder};
use std::net::TcpStream;
use std::time::Duration;

#[test]
fn one_notification_accepts_every_queued_connection() {
    let (fd, addr) = loopback_listener();
    let mut server = ServerBuilder::new()
        .handler(Recorder::default())
        .build(ListenFds::from_fds(vec![fd]).expect("listen fds"))
        .expect("build");

    let clients: Vec<TcpStream> = (0..3)
        .map(|_| TcpStream::connect(addr).expect("connect"))
        .collect();

    let mut events = Events::with_capacity(16);
    let n = server
        .poll(&mut events, Some(Duration::from_secs(2)))
        .expect("poll");

    assert_eq!(n, 1, "queued connections share one edge");
    assert_eq!(server.connection_count(), 3);
    assert_eq!(server.handler().opened.len(), 3);
    for token in &server.handler().opened {
        assert_eq!(server.registry().role(*token), Some(Role::Connection));
    }

    // The backlog is empty, so no further edge is pending.
    let n = server
        .poll(&mut events, Some(Duration::from_millis(50)))
        .expect("poll");
    assert_eq!(n, 0);

    drop(clients);
}

#[test]
fn later_connections_raise_a_new_edge() {
    let (fd, addr) = loopback_listener();
    let mut server = ServerBuilder::new()
        .handler(Recorder::default())
        .build(ListenFds::from_fds(vec![fd]).expect("listen fds"))
        .expect("build");
    let mut events = Events::with_capacity(16);

    let _first = TcpStream::connect(addr).expect("connect");
    assert!(turn_until(&mut server, &mut events, |s| s.connection_count() == 1));

    let _second = TcpStream::connect(addr).expect("connect");
    let _third = TcpStream::connect(addr).expect("connect");
    assert!(turn_until(&mut server, &mut events, |s| s.connection_count() == 3));

    assert_eq!(server.handler().opened.len(), 3);
    assert!(server.handler().closed.is_empty());
}

#[test]
fn every_listener_is_drained() {
    let (first_fd, first_addr) = loopback_listener();
    let (second_fd, second_addr) = loopback_listener();
    let mut server = ServerBuilder::new()
        .handler(Recorder::default())
        .build(ListenFds::from_fds(vec![first_fd, second_fd]).expect("listen fds"))
        .expect("build");
    let mut events = Events::with_capacity(16);

    let _a = TcpStream::connect(first_addr).expect("connect");
    let _b = TcpStream::connect(second_addr).expect("connect");
    let _c = TcpStream::connect(second_addr).expect("connect");

    assert!(turn_until(&mut server, &mut events, |s| s.connection_count() == 3));
    assert_eq!(server.listener_count(), 2);
}

#[test]
fn accepted_connections_know_their_peer() {
    #[derive(Default)]
    struct Peers(Vec<(std::os::fd::RawFd, Option<std::net::SocketAddr>)>);

    impl fluxel::ConnectionHandler for Peers {
        fn on_open(&mut self, connection: &fluxel::Connection) {
            self.0.push((connection.listener(), connection.peer_addr()));
        }

        fn on_readable(&mut self, _connection: &mut fluxel::Connection) -> fluxel::Disposition {
            fluxel::Disposition::Keep
        }
    }

    let (fd, addr) = loopback_listener();
    let listener = std::os::fd::AsRawFd::as_raw_fd(&fd);
    let mut server = ServerBuilder::new()
        .handler(Peers::default())
        .build(ListenFds::from_fds(vec![fd]).expect("listen fds"))
        .expect("build");
    let mut events = Events::with_capacity(4);

    let client = TcpStream::connect(addr).expect("connect");
    assert!(turn_until(&mut server, &mut events, |s| s.connection_count() == 1));

    assert_eq!(
        server.handler().0,
        vec![(listener, Some(client.local_addr().expect("client addr")))]
    );
}
