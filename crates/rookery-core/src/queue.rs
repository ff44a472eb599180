//! Work queue between reactor workers (producers) and data workers (consumers)
//!
//! Design:
//! - Ring buffer (`VecDeque`) behind a `Mutex`
//! - `Condvar` signalled once per push, so exactly one parked consumer wakes
//! - Unbounded: a reactor worker never blocks on push
//!
//! Being unbounded trades memory growth under sustained overload for
//! reactor liveness. `high_water()` exposes the peak depth so that growth
//! is visible in diagnostics.

use crate::error::QueueError;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Blocking FIFO with close-for-shutdown.
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Condvar,
    len: AtomicUsize,
    high_water: AtomicUsize,
}

impl<T> WorkQueue<T> {
    /// Create an empty queue with room for `capacity` items before growing.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            ready: Condvar::new(),
            len: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
        }
    }

    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState<T>>, QueueError> {
        self.state.lock().map_err(|_| QueueError::Poisoned)
    }

    /// Append to the back and wake one consumer. O(1) amortized.
    ///
    /// Fails only once the queue is closed or its lock is poisoned.
    pub fn push(&self, item: T) -> Result<(), QueueError> {
        {
            let mut state = self.lock()?;
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.items.push_back(item);
            let len = state.items.len();
            self.len.store(len, Ordering::Release);
            self.high_water.fetch_max(len, Ordering::Relaxed);
        }
        self.ready.notify_one();
        Ok(())
    }

    /// Remove the oldest item, blocking while the queue is empty.
    ///
    /// After [`close`](Self::close) the remaining items are still handed
    /// out; `Err(Closed)` is returned once none are left.
    pub fn pop(&self) -> Result<T, QueueError> {
        let mut state = self.lock()?;
        loop {
            if let Some(item) = state.items.pop_front() {
                self.len.store(state.items.len(), Ordering::Release);
                return Ok(item);
            }
            if state.closed {
                return Err(QueueError::Closed);
            }
            state = self.ready.wait(state).map_err(|_| QueueError::Poisoned)?;
        }
    }

    /// Refuse further pushes and wake every parked consumer.
    pub fn close(&self) {
        if let Ok(mut state) = self.lock() {
            state.closed = true;
        }
        self.ready.notify_all();
    }

    /// Approximate depth (for diagnostics)
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deepest the queue has been since creation
    #[inline]
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
