//! Server-wide counters
//!
//! All counters are relaxed atomics bumped on the hot path; a
//! [`StatsSnapshot`] is a plain copy for reporting and tests. Counters are
//! read independently, so a snapshot taken under load is not a single
//! consistent cut.

use crate::id::CoreId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by every server thread
#[derive(Debug)]
pub struct ServerStats {
    /// Sockets returned by accept
    pub accepted: AtomicU64,
    /// Accepted sockets dropped during setup or registration
    pub admit_failures: AtomicU64,
    /// Successful registrations, per reactor core
    registered: Box<[AtomicU64]>,
    /// Readiness events pushed to the work queue
    pub delivered: AtomicU64,
    /// Drain cycles run by data workers
    pub drains: AtomicU64,
    /// Connections re-armed after a drain
    pub rearmed: AtomicU64,
    /// Connections torn down (socket closed)
    pub closed: AtomicU64,
    /// Registrations removed during teardown
    pub deregistered: AtomicU64,
    /// Connections whose descriptor was already invalid
    pub invalidated: AtomicU64,
    /// Protocol handler invocations
    pub handler_calls: AtomicU64,
    /// Handler calls that panicked (the connection is torn down)
    pub handler_panics: AtomicU64,
    /// Bytes read from connections
    pub bytes_read: AtomicU64,
    /// Reactor or data workers that exited on a fatal error
    pub fatal_worker_exits: AtomicU64,
}

impl ServerStats {
    pub fn new(cores: usize) -> Self {
        Self {
            accepted: AtomicU64::new(0),
            admit_failures: AtomicU64::new(0),
            registered: (0..cores).map(|_| AtomicU64::new(0)).collect(),
            delivered: AtomicU64::new(0),
            drains: AtomicU64::new(0),
            rearmed: AtomicU64::new(0),
            closed: AtomicU64::new(0),
            deregistered: AtomicU64::new(0),
            invalidated: AtomicU64::new(0),
            handler_calls: AtomicU64::new(0),
            handler_panics: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            fatal_worker_exits: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Count a registration on `core`. Out-of-range cores are ignored.
    #[inline]
    pub fn record_registered(&self, core: CoreId) {
        if let Some(c) = self.registered.get(core.index()) {
            c.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn registered_on(&self, core: CoreId) -> u64 {
        self.registered
            .get(core.index())
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Copy every counter. `queue_high_water` comes from the work queue.
    pub fn snapshot(&self, queue_high_water: usize) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            accepted: load(&self.accepted),
            admit_failures: load(&self.admit_failures),
            registered: self.registered.iter().map(load).collect(),
            delivered: load(&self.delivered),
            drains: load(&self.drains),
            rearmed: load(&self.rearmed),
            closed: load(&self.closed),
            deregistered: load(&self.deregistered),
            invalidated: load(&self.invalidated),
            handler_calls: load(&self.handler_calls),
            handler_panics: load(&self.handler_panics),
            bytes_read: load(&self.bytes_read),
            fatal_worker_exits: load(&self.fatal_worker_exits),
            queue_high_water,
        }
    }
}

/// Point-in-time copy of [`ServerStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub admit_failures: u64,
    pub registered: Vec<u64>,
    pub delivered: u64,
    pub drains: u64,
    pub rearmed: u64,
    pub closed: u64,
    pub deregistered: u64,
    pub invalidated: u64,
    pub handler_calls: u64,
    pub handler_panics: u64,
    pub bytes_read: u64,
    pub fatal_worker_exits: u64,
    pub queue_high_water: usize,
}

impl StatsSnapshot {
    /// Sum of per-core registrations
    pub fn registered_total(&self) -> u64 {
        self.registered.iter().sum()
    }

    /// Accepted connections not yet torn down or dropped at admission
    pub fn open(&self) -> u64 {
        self.accepted
            .saturating_sub(self.admit_failures)
            .saturating_sub(self.closed)
            .saturating_sub(self.invalidated)
    }
}
