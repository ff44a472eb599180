//! # rookery-runtime
//!
//! Linux runtime for the rookery connection reactor.
//!
//! This crate provides:
//! - Per-core epoll registries with one-shot edge-triggered re-arm
//! - Acceptor threads with round-robin (or pinned) core selection
//! - Reactor workers feeding a shared work queue
//! - A fixed pool of data workers calling a pluggable [`ProtocolHandler`]
//! - CPU pinning for reactor workers
//!
//! ```rust,ignore
//! use rookery_runtime::{CannedHttp, Server, ServerConfig};
//!
//! let server = Server::start(ServerConfig::from_env(), CannedHttp::new())?;
//! println!("listening on {}", server.local_addr());
//! server.wait();
//! ```

pub mod error;
pub mod io;
pub mod connection;
pub mod handler;
pub mod affinity;
pub mod server;

mod acceptor;
mod reactor;
mod worker;

// Platform detection
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod poller;
    } else {
        compile_error!("rookery-runtime requires Linux (epoll)");
    }
}

// Re-exports
pub use connection::{ConnCtx, Connection};
pub use error::{AdmitError, ServerError};
pub use handler::{CannedHttp, ProtocolHandler};
pub use affinity::{platform_affinity, NoAffinity};
pub use server::{Server, ServerContext};
pub use rookery_core::{AcceptPolicy, ConnId, CoreId, ServerConfig, StatsSnapshot};

#[cfg(target_os = "linux")]
pub use affinity::LinuxAffinity;
