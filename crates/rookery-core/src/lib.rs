//! # rookery-core
//!
//! Core types for the rookery connection reactor.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Sockets, epoll and CPU pinning live in `rookery-runtime`.
//!
//! ## Modules
//!
//! - `id` - Connection handle and reactor core identifiers
//! - `arena` - Generation-checked connection slots with single-owner hand-off
//! - `queue` - Blocking FIFO between reactor workers and data workers
//! - `config` - Server configuration (defaults + env overrides + builder)
//! - `env` - Environment variable utilities
//! - `stats` - Server-wide counters
//! - `traits` - Platform capability traits (CPU affinity)
//! - `error` - Error types

pub mod id;
pub mod arena;
pub mod queue;
pub mod config;
pub mod env;
pub mod stats;
pub mod traits;
pub mod error;

// Re-exports for convenience
pub use id::{ConnId, CoreId};
pub use arena::ConnArena;
pub use queue::WorkQueue;
pub use config::{AcceptPolicy, ServerConfig};
pub use env::{env_get, env_get_bool, env_get_opt};
pub use stats::{ServerStats, StatsSnapshot};
pub use traits::CpuAffinity;
pub use error::{AffinityError, ArenaFull, ConfigError, QueueError};

/// Layout constants
pub mod constants {
    /// Slots per arena chunk (power of two)
    pub const ARENA_CHUNK_BITS: u32 = 10;

    /// Slots per arena chunk
    pub const ARENA_CHUNK_SIZE: usize = 1 << ARENA_CHUNK_BITS;

    /// Maximum chunks per arena. 4096 * 1024 = 4Mi connections,
    /// well beyond any realistic RLIMIT_NOFILE.
    pub const ARENA_MAX_CHUNKS: usize = 4096;

    /// Upper bound on reactor cores accepted by config validation
    pub const MAX_REACTOR_CORES: usize = 1024;

    /// Upper bound on the per-worker drain buffer (16 MiB)
    pub const MAX_ROUND_BYTES: usize = 16 << 20;
}
