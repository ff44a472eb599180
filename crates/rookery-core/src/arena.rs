//! Connection arena
//!
//! Stores connections in generation-tagged slots and hands each one to
//! exactly one owner at a time.
//!
//! Every slot is a hand-off cell whose state word packs
//! `generation << 2 | tag`, with tag one of EMPTY / FULL / BUSY:
//!
//! ```text
//!   insert ──► FULL ──checkout──► EMPTY (caller owns the value)
//!                ▲                  │
//!                └─────checkin──────┤
//!                                   └──release──► EMPTY, generation + 1
//! ```
//!
//! Each transition is a single compare-exchange on the state word that
//! also checks the generation, so a stale [`ConnId`] can neither take a
//! value nor retire the slot. BUSY is only held for the few instructions
//! that move the value in or out.
//!
//! Slots live in lazily allocated fixed-size chunks, so memory grows with
//! the number of concurrently live connections. Freed indices are recycled
//! through a lock-free queue.

use crate::constants::{ARENA_CHUNK_BITS, ARENA_CHUNK_SIZE, ARENA_MAX_CHUNKS};
use crate::error::ArenaFull;
use crate::id::ConnId;

use core::cell::UnsafeCell;
use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;

const TAG_EMPTY: u64 = 0;
const TAG_FULL: u64 = 1;
const TAG_BUSY: u64 = 2;
const TAG_MASK: u64 = 0b11;

#[inline]
const fn word(generation: u32, tag: u64) -> u64 {
    ((generation as u64) << 2) | tag
}

/// Single-value cell with generation-checked ownership transfer.
struct HandoffCell<T> {
    state: AtomicU64,
    value: UnsafeCell<Option<T>>,
}

// Safety: the value is only touched by the thread that moved the state to
// BUSY, and BUSY is exclusive.
unsafe impl<T: Send> Send for HandoffCell<T> {}
unsafe impl<T: Send> Sync for HandoffCell<T> {}

impl<T> HandoffCell<T> {
    fn new() -> Self {
        Self {
            state: AtomicU64::new(word(0, TAG_EMPTY)),
            value: UnsafeCell::new(None),
        }
    }

    /// Generation currently stamped on the slot.
    #[inline]
    fn generation(&self) -> u32 {
        (self.state.load(Ordering::Acquire) >> 2) as u32
    }

    #[inline]
    fn claim(&self, generation: u32, from: u64) -> bool {
        self.state
            .compare_exchange(
                word(generation, from),
                word(generation, TAG_BUSY),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    fn fill(&self, generation: u32, value: T) -> Result<(), T> {
        if !self.claim(generation, TAG_EMPTY) {
            return Err(value);
        }
        // Safety: we hold BUSY
        unsafe { *self.value.get() = Some(value) };
        self.state.store(word(generation, TAG_FULL), Ordering::Release);
        Ok(())
    }

    fn take(&self, generation: u32) -> Option<T> {
        if !self.claim(generation, TAG_FULL) {
            return None;
        }
        // Safety: we hold BUSY
        let value = unsafe { (*self.value.get()).take() };
        self.state.store(word(generation, TAG_EMPTY), Ordering::Release);
        value
    }

    fn retire(&self, generation: u32) -> bool {
        self.state
            .compare_exchange(
                word(generation, TAG_EMPTY),
                word(generation.wrapping_add(1), TAG_EMPTY),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.state.load(Ordering::Acquire) & TAG_MASK == TAG_FULL
    }
}

type Chunk<T> = Box<[HandoffCell<T>]>;

/// Growable slot table keyed by [`ConnId`].
pub struct ConnArena<T> {
    chunks: Box<[OnceLock<Chunk<T>>]>,
    /// Recycled slot indices
    free: SegQueue<u32>,
    /// Next never-used slot index
    next_fresh: AtomicU32,
    /// Maximum number of slots
    limit: u32,
    /// Slots currently holding a connection (checked in or out)
    live: AtomicUsize,
}

impl<T> ConnArena<T> {
    /// Arena with the default ceiling (`ARENA_MAX_CHUNKS * ARENA_CHUNK_SIZE`)
    pub fn new() -> Self {
        Self::with_limit(ARENA_MAX_CHUNKS * ARENA_CHUNK_SIZE)
    }

    /// Arena that refuses inserts once `limit` slots are in use.
    pub fn with_limit(limit: usize) -> Self {
        let limit = limit.clamp(1, ARENA_MAX_CHUNKS * ARENA_CHUNK_SIZE);
        let nchunks = limit.div_ceil(ARENA_CHUNK_SIZE);
        Self {
            chunks: (0..nchunks).map(|_| OnceLock::new()).collect(),
            free: SegQueue::new(),
            next_fresh: AtomicU32::new(0),
            limit: limit as u32,
            live: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn cell(&self, index: u32) -> Option<&HandoffCell<T>> {
        let chunk = self.chunks.get((index >> ARENA_CHUNK_BITS) as usize)?.get()?;
        chunk.get(index as usize & (ARENA_CHUNK_SIZE - 1))
    }

    fn cell_or_alloc(&self, index: u32) -> &HandoffCell<T> {
        let chunk = self.chunks[(index >> ARENA_CHUNK_BITS) as usize]
            .get_or_init(|| (0..ARENA_CHUNK_SIZE).map(|_| HandoffCell::new()).collect());
        &chunk[index as usize & (ARENA_CHUNK_SIZE - 1)]
    }

    fn allocate_index(&self) -> Option<u32> {
        if let Some(index) = self.free.pop() {
            return Some(index);
        }
        loop {
            let current = self.next_fresh.load(Ordering::Acquire);
            if current >= self.limit {
                return None;
            }
            if self
                .next_fresh
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(current);
            }
        }
    }

    /// Store `value` in a free slot and return its handle.
    ///
    /// The value is checked in: the first [`checkout`](Self::checkout)
    /// with the returned id takes it.
    pub fn insert(&self, value: T) -> Result<ConnId, ArenaFull<T>> {
        let Some(index) = self.allocate_index() else {
            return Err(ArenaFull(value));
        };
        let cell = self.cell_or_alloc(index);
        let generation = cell.generation();
        match cell.fill(generation, value) {
            Ok(()) => {
                self.live.fetch_add(1, Ordering::Relaxed);
                Ok(ConnId::new(index, generation))
            }
            // A free index always points at an empty slot; if not, keep it
            // out of circulation.
            Err(value) => Err(ArenaFull(value)),
        }
    }

    /// Move the value out. `None` for stale ids or values already out.
    pub fn checkout(&self, id: ConnId) -> Option<T> {
        self.cell(id.index())?.take(id.generation())
    }

    /// Put a checked-out value back under the same id.
    pub fn checkin(&self, id: ConnId, value: T) -> Result<(), T> {
        match self.cell(id.index()) {
            Some(cell) => cell.fill(id.generation(), value),
            None => Err(value),
        }
    }

    /// Retire a checked-out slot. The id (and any copy of it) becomes stale
    /// and the index is recycled.
    pub fn release(&self, id: ConnId) -> bool {
        let Some(cell) = self.cell(id.index()) else {
            return false;
        };
        if !cell.retire(id.generation()) {
            return false;
        }
        self.live.fetch_sub(1, Ordering::Relaxed);
        self.free.push(id.index());
        true
    }

    /// Whether the id currently refers to a checked-in value
    pub fn is_checked_in(&self, id: ConnId) -> bool {
        self.cell(id.index())
            .is_some_and(|c| c.generation() == id.generation() && c.is_full())
    }

    /// Number of live connections (checked in or out)
    #[inline]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit as usize
    }
}

impl<T> Default for ConnArena<T> {
    fn default() -> Self {
        Self::new()
    }
}
