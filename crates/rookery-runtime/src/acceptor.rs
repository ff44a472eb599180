//! Acceptor threads
//!
//! Every acceptor blocks in `accept` on the shared listening socket. A new
//! socket is made non-blocking, optionally gets `TCP_NODELAY`, is stored in
//! the arena and registered with the chosen reactor core. Failures on one
//! socket close it and never stop the loop.

use crate::connection::Connection;
use crate::error::AdmitError;
use crate::server::ServerContext;

use rookery_core::{AcceptPolicy, ConnId, CoreId, ServerStats};

use socket2::{SockAddr, Socket};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Pause after running out of descriptors or memory
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// What to do after a failed `accept`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcceptAction {
    /// Try again immediately
    Retry,
    /// That one connection failed; carry on
    Skip,
    /// Resource exhaustion; sleep briefly, then carry on
    Backoff,
    /// The listener is gone
    Stop,
}

pub(crate) fn accept_action(err: &io::Error) -> AcceptAction {
    match err.raw_os_error() {
        Some(libc::EINTR) => AcceptAction::Retry,
        Some(libc::EAGAIN) => AcceptAction::Retry,
        Some(libc::ECONNABORTED | libc::EPROTO | libc::EPERM) => AcceptAction::Skip,
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM) => AcceptAction::Backoff,
        Some(libc::EINVAL | libc::EBADF | libc::ENOTSOCK) => AcceptAction::Stop,
        _ => AcceptAction::Skip,
    }
}

/// Core for the next connection accepted by an acceptor homed on `home`
pub(crate) fn pick_core(ctx: &ServerContext, home: CoreId) -> CoreId {
    match ctx.config().accept_policy {
        AcceptPolicy::Pinned => home,
        AcceptPolicy::RoundRobin => {
            let n = ctx.next_core.fetch_add(1, Ordering::Relaxed);
            CoreId::from(n % ctx.core_count())
        }
    }
}

/// Acceptor loop. Returns when the listener stops accepting.
pub(crate) fn run(ctx: &ServerContext, acceptor: usize, home: CoreId) {
    debug!(acceptor, home = %home, "acceptor started");
    let stats = ctx.stats();

    loop {
        if ctx.is_shutting_down() {
            break;
        }
        match ctx.listener().accept() {
            Ok((socket, addr)) => {
                ServerStats::bump(&stats.accepted);
                let core = pick_core(ctx, home);
                match admit(ctx, socket, &addr, core) {
                    Ok(id) => trace!(conn = %id, core = %core, "admitted"),
                    Err(e) => {
                        ServerStats::bump(&stats.admit_failures);
                        warn!(acceptor, core = %core, error = %e, "dropping accepted connection");
                    }
                }
            }
            Err(e) => {
                if ctx.is_shutting_down() {
                    break;
                }
                match accept_action(&e) {
                    AcceptAction::Retry => continue,
                    AcceptAction::Skip => debug!(acceptor, error = %e, "accept failed"),
                    AcceptAction::Backoff => {
                        warn!(acceptor, error = %e, "accept out of resources, backing off");
                        thread::sleep(ACCEPT_BACKOFF);
                    }
                    AcceptAction::Stop => {
                        warn!(acceptor, error = %e, "listener unusable, acceptor exiting");
                        break;
                    }
                }
            }
        }
    }
    info!(acceptor, "acceptor stopped");
}

/// Configure, store and register one accepted socket.
///
/// On error the socket is closed and no slot is left behind.
pub(crate) fn admit(
    ctx: &ServerContext,
    socket: Socket,
    addr: &SockAddr,
    core: CoreId,
) -> Result<ConnId, AdmitError> {
    let stream: TcpStream = socket.into();
    stream.set_nonblocking(true).map_err(AdmitError::Setup)?;
    if ctx.config().tcp_nodelay {
        stream.set_nodelay(true).map_err(AdmitError::Setup)?;
    }
    let peer = addr
        .as_socket()
        .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));

    let conn = Connection::new(stream, core, peer);
    let fd = conn.fd();
    let id = ctx.arena().insert(conn).map_err(|_| AdmitError::ArenaFull)?;

    if let Err(e) = ctx.poller(core).register(fd, id) {
        if let Some(conn) = ctx.arena().checkout(id) {
            ctx.arena().release(id);
            drop(conn);
        }
        return Err(AdmitError::Register(e));
    }
    ctx.stats().record_registered(core);
    Ok(id)
}
