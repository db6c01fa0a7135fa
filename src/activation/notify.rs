//! Readiness announcement to the service manager.

use std::env;
use std::ffi::OsStr;
use std::io;
use std::os::linux::net::SocketAddrExt;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::{SocketAddr, UnixDatagram};
use std::path::PathBuf;

const NOTIFY_SOCKET: &str = "NOTIFY_SOCKET";

/// Receives the one-shot "ready" signal once setup has succeeded.
pub trait ReadinessNotifier {
    fn notify_ready(&mut self) -> io::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NotifyAddr {
    Path(PathBuf),
    Abstract(Vec<u8>),
}

/// Sends state datagrams to `NOTIFY_SOCKET`, as `sd_notify` does.
///
/// Without a socket address every notification is a no-op.
#[derive(Debug, Clone)]
pub struct SystemdNotifier {
    address: Option<NotifyAddr>,
}

impl SystemdNotifier {
    pub fn from_env() -> Self {
        match env::var_os(NOTIFY_SOCKET) {
            Some(address) if !address.is_empty() => Self::new(address),
            _ => Self::disabled(),
        }
    }

    /// A leading `@` selects the abstract namespace.
    pub fn new(address: impl AsRef<OsStr>) -> Self {
        let bytes = address.as_ref().as_bytes();

        let address = match bytes.strip_prefix(b"@") {
            Some(name) => NotifyAddr::Abstract(name.to_vec()),
            None => NotifyAddr::Path(PathBuf::from(address.as_ref())),
        };

        Self {
            address: Some(address),
        }
    }

    pub fn disabled() -> Self {
        Self { address: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.address.is_some()
    }

    /// Sends `state` as a single datagram. Returns `false` when disabled.
    pub fn notify(&self, state: &str) -> io::Result<bool> {
        let Some(address) = &self.address else {
            return Ok(false);
        };

        let socket = UnixDatagram::unbound()?;

        match address {
            NotifyAddr::Path(path) => socket.send_to(state.as_bytes(), path)?,
            NotifyAddr::Abstract(name) => {
                let address = SocketAddr::from_abstract_name(name)?;
                socket.send_to_addr(state.as_bytes(), &address)?
            }
        };

        Ok(true)
    }
}

impl ReadinessNotifier for SystemdNotifier {
    fn notify_ready(&mut self) -> io::Result<()> {
        self.notify("READY=1").map(|_| ())
    }
}
