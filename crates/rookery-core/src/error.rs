//! Error types for the rookery core

use core::fmt;
use thiserror::Error;

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    InvalidValue(&'static str),

    #[error("unknown accept policy {0:?} (expected \"round-robin\" or \"pinned\")")]
    UnknownAcceptPolicy(String),
}

/// Work queue errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue was closed for shutdown and holds no more items
    #[error("work queue closed")]
    Closed,

    /// A thread panicked while holding the queue lock
    #[error("work queue lock poisoned")]
    Poisoned,
}

/// CPU affinity errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AffinityError {
    /// The platform has no affinity control
    #[error("cpu affinity not supported on this platform")]
    Unsupported,

    /// The kernel rejected the affinity mask
    #[error("failed to pin to cpu {cpu}: errno {errno}")]
    Rejected { cpu: usize, errno: i32 },
}

/// Returned when the connection arena has no slot left.
///
/// Carries the value back so the caller decides how to dispose of it.
#[derive(Clone, PartialEq, Eq, Error)]
#[error("connection arena exhausted")]
pub struct ArenaFull<T>(pub T);

impl<T> ArenaFull<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for ArenaFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ArenaFull(..)")
    }
}
