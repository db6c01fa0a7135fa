#![allow(dead_code)]

use fluxel::{Connection, ConnectionHandler, Disposition, Events, Server, Token};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::OwnedFd;
use std::time::{Duration, Instant};

/// Records every callback and echoes received bytes when asked to.
#[derive(Debug, Default)]
pub struct Recorder {
    pub opened: Vec<Token>,
    pub closed: Vec<Token>,
    pub received: Vec<u8>,
    pub echo: bool,
}

impl ConnectionHandler for Recorder {
    fn on_open(&mut self, connection: &Connection) {
        self.opened.push(connection.token());
    }

    fn on_readable(&mut self, connection: &mut Connection) -> Disposition {
        let mut buf = [0u8; 1024];

        loop {
            match connection.read(&mut buf) {
                Ok(0) => return Disposition::Close,
                Ok(n) => {
                    self.received.extend_from_slice(&buf[..n]);
                    if self.echo {
                        connection.write(&buf[..n]).expect("echo write");
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Disposition::Keep,
                Err(_) => return Disposition::Close,
            }
        }
    }

    fn on_close(&mut self, connection: &Connection) {
        self.closed.push(connection.token());
    }
}

pub fn loopback_listener() -> (OwnedFd, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let addr = listener.local_addr().expect("local addr");

    (OwnedFd::from(listener), addr)
}

/// Dispatches events until `done` holds or two seconds pass.
pub fn turn_until<H: ConnectionHandler>(
    server: &mut Server<H>,
    events: &mut Events,
    mut done: impl FnMut(&Server<H>) -> bool,
) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);

    while !done(server) {
        if Instant::now() >= deadline {
            return false;
        }
        server
            .poll(events, Some(Duration::from_millis(50)))
            .expect("poll");
    }

    true
}
