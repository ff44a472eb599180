//! Library defaults
//!
//! Each value can be overridden at runtime through the matching `ROOK_*`
//! environment variable (see [`ServerConfig::from_env`](super::ServerConfig::from_env)).

use super::AcceptPolicy;
use std::net::Ipv4Addr;

/// Listening address
pub const LISTEN_IP: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

/// Listening port
pub const LISTEN_PORT: u16 = 8080;

/// Listen backlog
pub const LISTEN_BACKLOG: u32 = 1024;

/// Size hint handed to each readiness registry at creation
pub const REGISTRY_HINT: usize = 500;

/// Maximum events returned by one readiness wait
pub const EVENTS_PER_WAIT: usize = 10;

/// Acceptor threads per reactor core
pub const ACCEPTORS_PER_CORE: usize = 2;

/// Data worker pool size
pub const DATA_WORKERS: usize = 20;

/// Disable Nagle on accepted sockets
pub const TCP_NODELAY: bool = false;

/// Reactor cores (0 = one per available CPU)
pub const REACTOR_CORES: usize = 0;

/// Bytes read per drain round before the connection is re-armed.
/// Two 1448-byte TCP segments.
pub const ROUND_BYTES: usize = 2896;

/// Accept distribution policy
pub const ACCEPT_POLICY: AcceptPolicy = AcceptPolicy::RoundRobin;

/// Pin each reactor worker to its CPU
pub const PIN_REACTORS: bool = true;
