//! Server context and lifecycle
//!
//! [`ServerContext`] holds everything the threads share: the listener, one
//! poller per core, the connection arena, the work queue, the handler and
//! the counters. It is built once in [`Server::start`] and handed to every
//! thread behind an `Arc`.
//!
//! Startup order is data workers, then reactors, then acceptors, so every
//! stage has a consumer before it produces. Shutdown runs the other way:
//! stop accepting, wake the reactors, close the queue, join everything.

use crate::acceptor;
use crate::affinity::platform_affinity;
use crate::connection::Connection;
use crate::error::{Result, ServerError};
use crate::handler::ProtocolHandler;
use crate::poller::Poller;
use crate::reactor;
use crate::worker;

use rookery_core::{
    ConnArena, ConnId, CoreId, CpuAffinity, ServerConfig, ServerStats, StatsSnapshot, WorkQueue,
};

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// State shared by all server threads
pub struct ServerContext {
    config: ServerConfig,
    listener: Socket,
    local_addr: SocketAddr,
    pollers: Box<[Poller]>,
    arena: ConnArena<Connection>,
    queue: WorkQueue<ConnId>,
    handler: Box<dyn ProtocolHandler>,
    stats: ServerStats,
    shutdown: AtomicBool,
    /// Round-robin cursor shared by all acceptors
    pub(crate) next_core: AtomicUsize,
}

impl ServerContext {
    /// Bind the listener and create one poller per core.
    pub fn new(config: ServerConfig, handler: Box<dyn ProtocolHandler>) -> Result<Self> {
        config.validate()?;
        let cores = config.resolved_cores();

        let listener = bind_listener(&config).map_err(|source| ServerError::Listen {
            addr: config.listen_addr,
            source,
        })?;
        let local_addr = listener
            .local_addr()
            .ok()
            .and_then(|a| a.as_socket())
            .unwrap_or(config.listen_addr);

        let pollers = (0..cores)
            .map(|core| {
                Poller::new(CoreId::from(core), config.registry_hint)
                    .map_err(|source| ServerError::Registry { core, source })
            })
            .collect::<Result<Box<[Poller]>>>()?;

        Ok(Self {
            listener,
            local_addr,
            pollers,
            arena: ConnArena::new(),
            queue: WorkQueue::with_capacity(config.registry_hint),
            handler,
            stats: ServerStats::new(cores),
            shutdown: AtomicBool::new(false),
            next_core: AtomicUsize::new(0),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[inline]
    pub fn core_count(&self) -> usize {
        self.pollers.len()
    }

    #[inline]
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    #[inline]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn listener(&self) -> &Socket {
        &self.listener
    }

    #[inline]
    pub(crate) fn poller(&self, core: CoreId) -> &Poller {
        &self.pollers[core.index()]
    }

    #[inline]
    pub(crate) fn arena(&self) -> &ConnArena<Connection> {
        &self.arena
    }

    #[inline]
    pub(crate) fn queue(&self) -> &WorkQueue<ConnId> {
        &self.queue
    }

    #[inline]
    pub(crate) fn handler(&self) -> &dyn ProtocolHandler {
        &*self.handler
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot(self.queue.high_water())
    }

    /// Stop accepting, wake reactors, close the queue. Idempotent.
    pub(crate) fn begin_shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        // Wakes blocked accept() with EINVAL
        if let Err(e) = self.listener.shutdown(Shutdown::Read) {
            debug!(error = %e, "listener shutdown");
        }
        for poller in self.pollers.iter() {
            if let Err(e) = poller.wake() {
                error!(core = %poller.core(), error = %e, "failed to wake reactor");
            }
        }
        self.queue.close();
    }
}

fn bind_listener(config: &ServerConfig) -> io::Result<Socket> {
    let addr = config.listen_addr;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(config.listen_backlog as i32)?;
    Ok(socket)
}

/// Running server. Dropping it shuts everything down.
pub struct Server {
    ctx: Arc<ServerContext>,
    threads: Vec<JoinHandle<()>>,
}

impl Server {
    /// Bind, spawn every thread and start accepting.
    ///
    /// On error, threads already started are stopped and joined.
    pub fn start<H: ProtocolHandler>(config: ServerConfig, handler: H) -> Result<Self> {
        let ctx = Arc::new(ServerContext::new(config, Box::new(handler))?);
        let config = ctx.config();
        let cores = ctx.core_count();
        config.log();

        let mut server = Server {
            threads: Vec::with_capacity(
                config.data_workers + cores + config.acceptor_threads(),
            ),
            ctx: Arc::clone(&ctx),
        };

        for i in 0..config.data_workers {
            server.spawn(format!("rook-worker-{}", i), move |ctx| worker::run(ctx, i))?;
        }

        let affinity: Arc<dyn CpuAffinity> = Arc::from(platform_affinity(config.pin_reactors));
        for core in (0..cores).map(CoreId::from) {
            let affinity = Arc::clone(&affinity);
            server.spawn(format!("rook-reactor-{}", core.as_u32()), move |ctx| {
                reactor::run(ctx, core, &*affinity)
            })?;
        }

        for i in 0..config.acceptor_threads() {
            let home = CoreId::from(i % cores);
            server.spawn(format!("rook-accept-{}", i), move |ctx| {
                acceptor::run(ctx, i, home)
            })?;
        }

        info!(
            addr = %ctx.local_addr(),
            cores,
            data_workers = config.data_workers,
            acceptors = config.acceptor_threads(),
            "server started"
        );
        Ok(server)
    }

    fn spawn<F>(&mut self, name: String, f: F) -> Result<()>
    where
        F: FnOnce(&ServerContext) + Send + 'static,
    {
        let ctx = Arc::clone(&self.ctx);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || f(&ctx))
            .map_err(|source| ServerError::Spawn { name, source })?;
        self.threads.push(handle);
        Ok(())
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.ctx.local_addr()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.ctx.snapshot()
    }

    /// Connections currently held in the arena
    pub fn live_connections(&self) -> usize {
        self.ctx.arena().live()
    }

    pub fn core_count(&self) -> usize {
        self.ctx.core_count()
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Block until every server thread has exited.
    pub fn wait(mut self) {
        self.join_all();
    }

    /// Stop all threads and wait for them.
    pub fn shutdown(&mut self) {
        self.ctx.begin_shutdown();
        self.join_all();
    }

    fn join_all(&mut self) {
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("?").to_string();
            if handle.join().is_err() {
                error!(thread = %name, "server thread panicked");
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}
