//! Data workers
//!
//! A fixed pool pops connection ids from the work queue. For each id the
//! worker checks the connection out of the arena (stale ids resolve to
//! nothing and are skipped), drains it, then either checks it back in and
//! re-arms it or tears it down.
//!
//! A drain reads until the socket would block or `round_bytes` have been
//! read. The per-round cap keeps one busy connection from monopolising a
//! worker; re-arming a still-readable socket produces a fresh event.
//!
//! A panicking handler costs its connection, not the worker: the panic is
//! caught around `on_data` and the connection is torn down.

use crate::connection::Connection;
use crate::handler::ProtocolHandler;
use crate::io::{classify, retry_interrupted, IoClass};
use crate::server::ServerContext;

use rookery_core::{ConnId, QueueError, ServerStats};

use std::any::Any;
use std::io::{self, Read};
use std::net::TcpStream;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info, trace, warn};

/// Why a connection is being torn down
#[derive(Debug)]
pub(crate) enum CloseReason {
    /// Orderly end of stream
    PeerClosed,
    /// Reset, broken pipe or similar
    PeerGone(io::Error),
    /// The protocol handler asked for it
    Requested,
    /// The protocol handler panicked
    HandlerPanicked(String),
    /// Any other read error
    Failed(io::Error),
}

/// Result of one drain round
#[derive(Debug)]
pub(crate) enum Drain {
    /// Nothing more to read now (or round budget used); re-arm
    Yield,
    /// Tear the connection down
    Close(CloseReason),
    /// The descriptor is already gone; release the slot only
    Invalidated,
}

/// Read up to `buf.len()` bytes in total, calling `handler` after each read.
pub(crate) fn drain(
    conn: &mut Connection,
    id: ConnId,
    buf: &mut [u8],
    handler: &dyn ProtocolHandler,
    stats: &ServerStats,
) -> Drain {
    let mut budget = buf.len();
    while budget > 0 {
        let read = retry_interrupted(|| {
            let mut stream: &TcpStream = conn.stream();
            stream.read(&mut buf[..budget])
        });
        match read {
            Ok(0) => return Drain::Close(CloseReason::PeerClosed),
            Ok(n) => {
                budget -= n;
                ServerStats::add(&stats.bytes_read, n as u64);
                ServerStats::bump(&stats.handler_calls);
                let call = panic::catch_unwind(AssertUnwindSafe(|| {
                    handler.on_data(&mut conn.ctx(id, &buf[..n]))
                }));
                if let Err(payload) = call {
                    ServerStats::bump(&stats.handler_panics);
                    return Drain::Close(CloseReason::HandlerPanicked(panic_message(&*payload)));
                }
                if conn.close_requested() {
                    return Drain::Close(CloseReason::Requested);
                }
            }
            Err(e) => {
                return match classify(&e) {
                    IoClass::WouldBlock | IoClass::Interrupted => Drain::Yield,
                    IoClass::PeerGone => Drain::Close(CloseReason::PeerGone(e)),
                    IoClass::Invalidated => Drain::Invalidated,
                    IoClass::Fatal => Drain::Close(CloseReason::Failed(e)),
                }
            }
        }
    }
    Drain::Yield
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Data worker loop. Returns once the queue is closed and empty.
pub(crate) fn run(ctx: &ServerContext, worker: usize) {
    let mut buf = vec![0u8; ctx.config().round_bytes];
    let stats = ctx.stats();
    debug!(worker, "data worker started");

    loop {
        let id = match ctx.queue().pop() {
            Ok(id) => id,
            Err(QueueError::Closed) => break,
            Err(e) => {
                error!(worker, error = %e, "data worker exiting");
                ServerStats::bump(&stats.fatal_worker_exits);
                return;
            }
        };
        let Some(mut conn) = ctx.arena().checkout(id) else {
            trace!(worker, conn = %id, "stale connection id");
            continue;
        };

        ServerStats::bump(&stats.drains);
        match drain(&mut conn, id, &mut buf, ctx.handler(), stats) {
            Drain::Yield => rearm(ctx, id, conn),
            Drain::Close(reason) => {
                match &reason {
                    CloseReason::Failed(e) => warn!(worker, conn = %id, error = %e, "read failed"),
                    CloseReason::HandlerPanicked(msg) => {
                        error!(worker, conn = %id, panic = %msg, "protocol handler panicked")
                    }
                    reason => trace!(worker, conn = %id, ?reason, "closing"),
                }
                teardown(ctx, id, conn);
            }
            Drain::Invalidated => {
                debug!(worker, conn = %id, "descriptor already invalid");
                ctx.arena().release(id);
                conn.forget();
                ServerStats::bump(&stats.invalidated);
            }
        }
    }
    info!(worker, "data worker stopped");
}

/// Check the connection back in, then arm it for the next event.
fn rearm(ctx: &ServerContext, id: ConnId, conn: Connection) {
    let fd = conn.fd();
    let core = conn.core();
    if let Err(conn) = ctx.arena().checkin(id, conn) {
        teardown(ctx, id, conn);
        return;
    }
    match ctx.poller(core).rearm(fd, id) {
        Ok(()) => ServerStats::bump(&ctx.stats().rearmed),
        Err(e) => {
            warn!(conn = %id, core = %core, error = %e, "re-arm failed");
            if let Some(conn) = ctx.arena().checkout(id) {
                teardown(ctx, id, conn);
            }
        }
    }
}

/// Deregister, close and free the slot.
fn teardown(ctx: &ServerContext, id: ConnId, conn: Connection) {
    let stats = ctx.stats();
    match ctx.poller(conn.core()).deregister(conn.fd()) {
        Ok(()) => ServerStats::bump(&stats.deregistered),
        Err(e) => debug!(conn = %id, error = %e, "deregister failed"),
    }
    drop(conn);
    ctx.arena().release(id);
    ServerStats::bump(&stats.closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnCtx;
    use rookery_core::{CoreId, ServerConfig};
    use std::io::Write;
    use std::net::TcpListener;
    use std::os::fd::AsRawFd;
    use std::sync::Mutex;
    use std::time::Duration;

    fn pair() -> (TcpStream, Connection) {
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(l.local_addr().unwrap()).unwrap();
        let (server, peer) = l.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (client, Connection::new(server, CoreId::new(0), peer))
    }

    /// Records every fresh chunk
    #[derive(Default)]
    struct Recorder(Mutex<Vec<Vec<u8>>>);

    impl ProtocolHandler for Recorder {
        fn on_data(&self, ctx: &mut ConnCtx<'_>) {
            self.0.lock().unwrap().push(ctx.fresh().to_vec());
            let n = ctx.pending().len();
            ctx.consume(n);
        }
    }

    impl Recorder {
        fn bytes(&self) -> Vec<u8> {
            self.0.lock().unwrap().concat()
        }
    }

    fn wait_readable(stream: &TcpStream) {
        let mut pfd = libc::pollfd {
            fd: stream.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let n = unsafe { libc::poll(&mut pfd, 1, 5000) };
        assert_eq!(n, 1);
    }

    #[test]
    fn test_drain_yields_when_empty() {
        let (_client, mut conn) = pair();
        let rec = Recorder::default();
        let stats = ServerStats::new(1);
        let mut buf = [0u8; 64];
        let out = drain(&mut conn, ConnId::new(0, 0), &mut buf, &rec, &stats);
        assert!(matches!(out, Drain::Yield));
        assert_eq!(stats.snapshot(0).handler_calls, 0);
    }

    #[test]
    fn test_drain_stops_at_round_budget() {
        let (mut client, mut conn) = pair();
        client.write_all(&[b'x'; 100]).unwrap();
        wait_readable(conn.stream());

        let rec = Recorder::default();
        let stats = ServerStats::new(1);
        let mut buf = [0u8; 40];
        let id = ConnId::new(0, 0);

        for _ in 0..3 {
            assert!(matches!(drain(&mut conn, id, &mut buf, &rec, &stats), Drain::Yield));
        }
        // 40 + 40 + 20, never more than the budget per round
        assert_eq!(rec.bytes().len(), 100);
        assert!(rec.0.lock().unwrap().iter().all(|c| c.len() <= 40));
    }

    #[test]
    fn test_drain_reports_peer_close_after_data() {
        let (mut client, mut conn) = pair();
        client.write_all(b"bye").unwrap();
        drop(client);
        wait_readable(conn.stream());
        // let the FIN land behind the data
        std::thread::sleep(std::time::Duration::from_millis(50));

        let rec = Recorder::default();
        let stats = ServerStats::new(1);
        let mut buf = [0u8; 64];
        let out = drain(&mut conn, ConnId::new(0, 0), &mut buf, &rec, &stats);
        assert!(matches!(out, Drain::Close(CloseReason::PeerClosed)));
        assert_eq!(rec.bytes(), b"bye");
        assert_eq!(stats.snapshot(0).bytes_read, 3);
    }

    #[test]
    fn test_drain_honours_handler_close() {
        let (mut client, mut conn) = pair();
        client.write_all(b"quit").unwrap();
        wait_readable(conn.stream());

        let closer = |ctx: &mut ConnCtx<'_>| ctx.close();
        let stats = ServerStats::new(1);
        let mut buf = [0u8; 64];
        let out = drain(&mut conn, ConnId::new(0, 0), &mut buf, &closer, &stats);
        assert!(matches!(out, Drain::Close(CloseReason::Requested)));
    }

    /// Echoes everything, panics on "boom"
    fn fragile(ctx: &mut ConnCtx<'_>) {
        if ctx.fresh() == b"boom" {
            panic!("handler exploded");
        }
        let data = ctx.pending().to_vec();
        ctx.consume(data.len());
        ctx.write_all(&data).unwrap();
    }

    fn context(handler: impl ProtocolHandler) -> ServerContext {
        let config = ServerConfig::new()
            .listen_addr("127.0.0.1:0".parse().unwrap())
            .reactor_cores(1)
            .data_workers(1)
            .pin_reactors(false);
        ServerContext::new(config, Box::new(handler)).unwrap()
    }

    #[test]
    fn test_drain_contains_handler_panic() {
        let (mut client, mut conn) = pair();
        client.write_all(b"boom").unwrap();
        wait_readable(conn.stream());

        let stats = ServerStats::new(1);
        let mut buf = [0u8; 64];
        let out = drain(&mut conn, ConnId::new(0, 0), &mut buf, &fragile, &stats);
        match out {
            Drain::Close(CloseReason::HandlerPanicked(msg)) => assert_eq!(msg, "handler exploded"),
            other => panic!("unexpected drain outcome {:?}", other),
        }
        assert_eq!(stats.snapshot(0).handler_panics, 1);
    }

    #[test]
    fn test_worker_survives_handler_panic() {
        let ctx = context(fragile);
        let core = CoreId::new(0);
        let (mut bad, bad_conn) = pair();
        let (mut good, good_conn) = pair();

        let mut ids = Vec::new();
        for conn in [bad_conn, good_conn] {
            let fd = conn.fd();
            let id = ctx.arena().insert(conn).unwrap();
            ctx.poller(core).register(fd, id).unwrap();
            ids.push(id);
        }
        bad.write_all(b"boom").unwrap();
        good.write_all(b"ping").unwrap();
        wait_all_readable(&ctx, &ids);

        for &id in &ids {
            ctx.queue().push(id).unwrap();
        }
        ctx.queue().close();
        // One worker serves both: the panic on the first must not end it
        run(&ctx, 0);

        let snap = ctx.snapshot();
        assert_eq!(snap.handler_panics, 1);
        assert_eq!(snap.closed, 1);
        assert_eq!(snap.deregistered, 1);
        assert_eq!(snap.fatal_worker_exits, 0);
        assert_eq!(ctx.arena().live(), 1);

        good.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut echo = [0u8; 4];
        std::io::Read::read_exact(&mut good, &mut echo).unwrap();
        assert_eq!(&echo, b"ping");

        bad.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut rest = [0u8; 1];
        assert!(matches!(std::io::Read::read(&mut bad, &mut rest), Ok(0) | Err(_)));
    }

    /// Wait until every connection in the arena has bytes queued
    fn wait_all_readable(ctx: &ServerContext, ids: &[ConnId]) {
        for &id in ids {
            let conn = ctx.arena().checkout(id).unwrap();
            wait_readable(conn.stream());
            assert!(ctx.arena().checkin(id, conn).is_ok());
        }
    }

    #[test]
    fn test_worker_releases_invalidated_descriptor() {
        let ctx = context(Recorder::default());
        let (_client, conn) = pair();
        let fd = conn.fd();
        let id = ctx.arena().insert(conn).unwrap();

        // Swap the socket for an O_PATH descriptor: reads fail with EBADF
        unsafe {
            let path = libc::open(b"/\0".as_ptr().cast(), libc::O_PATH | libc::O_CLOEXEC);
            assert!(path >= 0);
            assert!(libc::dup2(path, fd) >= 0);
            libc::close(path);
        }

        ctx.queue().push(id).unwrap();
        ctx.queue().close();
        run(&ctx, 0);

        let snap = ctx.snapshot();
        assert_eq!(snap.invalidated, 1);
        assert_eq!(snap.closed, 0);
        assert_eq!(ctx.arena().live(), 0);
        assert!(ctx.arena().checkout(id).is_none());
    }
}
