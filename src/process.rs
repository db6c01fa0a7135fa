//! Process entry: acquire, register, announce, dispatch.

use crate::activation::listen_fds::ListenFds;
use crate::activation::notify::{ReadinessNotifier, SystemdNotifier};
use crate::builder::ServerBuilder;
use crate::error::Result;
use crate::handler::ConnectionHandler;
use crate::reactor::core::Server;

use tracing::{info, warn};

/// Runs setup and announces readiness exactly once, on success only.
///
/// A failure anywhere in acquisition or registration returns before the
/// notifier is touched, so the manager sees a failed start instead of a
/// false "ready".
pub fn prepare<H, N>(
    acquire: impl FnOnce() -> Result<ListenFds>,
    builder: ServerBuilder<H>,
    notifier: &mut N,
) -> Result<Server<H>>
where
    H: ConnectionHandler,
    N: ReadinessNotifier + ?Sized,
{
    let listen_fds = acquire()?;
    let server = builder.build(listen_fds)?;

    if let Err(err) = notifier.notify_ready() {
        warn!(error = %err, "failed to notify readiness");
    }

    info!(listeners = server.listener_count(), "ready");

    Ok(server)
}

/// [`prepare`], then run the dispatch loop until it fails.
pub fn serve<H, N>(
    acquire: impl FnOnce() -> Result<ListenFds>,
    builder: ServerBuilder<H>,
    notifier: &mut N,
) -> Result<()>
where
    H: ConnectionHandler,
    N: ReadinessNotifier + ?Sized,
{
    prepare(acquire, builder, notifier)?.run()
}

/// Serves the sockets passed by the service manager with the default handler.
pub fn run_from_env() -> Result<()> {
    let mut notifier = SystemdNotifier::from_env();

    serve(
        || ListenFds::from_env(true),
        ServerBuilder::new(),
        &mut notifier,
    )
}
