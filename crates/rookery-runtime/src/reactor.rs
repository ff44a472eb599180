//! Reactor worker: one per core
//!
//! Waits on its core's [`Poller`](crate::poller::Poller) and turns each
//! read-ready event into a work queue entry. It never touches connection
//! state; the one-shot registration keeps the connection disarmed until a
//! data worker re-arms it.

use crate::io::{classify, IoClass};
use crate::poller::Events;
use crate::server::ServerContext;

use rookery_core::{CoreId, CpuAffinity, QueueError, ServerStats};

use tracing::{debug, error, info, trace, warn};

/// Reactor loop. Returns on shutdown or on a fatal wait/queue error.
pub(crate) fn run(ctx: &ServerContext, core: CoreId, affinity: &dyn CpuAffinity) {
    match affinity.pin_current(core.index()) {
        Ok(()) => debug!(core = %core, affinity = affinity.name(), "reactor pinned"),
        Err(e) => warn!(core = %core, error = %e, "reactor running unpinned"),
    }

    let poller = ctx.poller(core);
    let stats = ctx.stats();
    let mut events = Events::with_capacity(ctx.config().events_per_wait);

    info!(core = %core, "reactor started");
    loop {
        if let Err(e) = poller.wait(&mut events, None) {
            if classify(&e) == IoClass::Interrupted {
                continue;
            }
            error!(core = %core, error = %e, "readiness wait failed, reactor exiting");
            ServerStats::bump(&stats.fatal_worker_exits);
            return;
        }

        for ev in events.iter() {
            if ev.is_wake() {
                if ctx.is_shutting_down() {
                    info!(core = %core, "reactor stopped");
                    return;
                }
                poller.reset_wake();
                continue;
            }
            if !ev.is_readable() {
                debug!(core = %core, events = ev.raw_events(), "ignoring event");
                continue;
            }
            let id = ev.conn_id();
            match ctx.queue().push(id) {
                Ok(()) => {
                    ServerStats::bump(&stats.delivered);
                    trace!(core = %core, conn = %id, "delivered");
                }
                Err(QueueError::Closed) => {
                    info!(core = %core, "work queue closed, reactor stopped");
                    return;
                }
                Err(e) => {
                    error!(core = %core, error = %e, "reactor exiting");
                    ServerStats::bump(&stats.fatal_worker_exits);
                    return;
                }
            }
        }
    }
}
