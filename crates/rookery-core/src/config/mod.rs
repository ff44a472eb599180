//! Server configuration
//!
//! Provides compiled-in defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Explicit builder calls (the binary maps its CLI flags onto these)
//! 2. Environment variables (`ROOK_*`)
//! 3. Library defaults ([`defaults`])
//!
//! # Example
//!
//! ```rust,ignore
//! use rookery_core::config::ServerConfig;
//!
//! let config = ServerConfig::from_env()
//!     .listen_addr("127.0.0.1:0".parse()?)
//!     .data_workers(4);
//! config.validate()?;
//! ```

pub mod defaults;

use crate::constants::{MAX_REACTOR_CORES, MAX_ROUND_BYTES};
use crate::env::{env_get, env_get_bool, env_get_opt};
use crate::error::ConfigError;

use core::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use tracing::info;

/// How acceptors choose the reactor core for a new connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcceptPolicy {
    /// One shared counter across all acceptors, incremented per accept
    #[default]
    RoundRobin,
    /// Each acceptor registers on its own home core
    Pinned,
}

impl FromStr for AcceptPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round-robin" | "roundrobin" | "rr" => Ok(AcceptPolicy::RoundRobin),
            "pinned" | "home" => Ok(AcceptPolicy::Pinned),
            _ => Err(ConfigError::UnknownAcceptPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for AcceptPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AcceptPolicy::RoundRobin => "round-robin",
            AcceptPolicy::Pinned => "pinned",
        })
    }
}

/// Server configuration with builder pattern.
///
/// Immutable once handed to the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listening socket binds to
    pub listen_addr: SocketAddr,
    /// Listen backlog
    pub listen_backlog: u32,
    /// Size hint for each reactor core's readiness registry
    pub registry_hint: usize,
    /// Maximum events handled per readiness wait
    pub events_per_wait: usize,
    /// Acceptor threads per reactor core
    pub acceptors_per_core: usize,
    /// Data worker pool size
    pub data_workers: usize,
    /// Disable Nagle on accepted sockets
    pub tcp_nodelay: bool,
    /// Reactor cores (0 = available parallelism)
    pub reactor_cores: usize,
    /// Bytes read per drain round before re-arming
    pub round_bytes: usize,
    /// Core selection for accepted connections
    pub accept_policy: AcceptPolicy,
    /// Pin reactor workers to their CPU
    pub pin_reactors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ServerConfig {
    /// Create config from library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `ROOK_LISTEN_ADDR` - Listen address (`ip:port`)
    /// - `ROOK_LISTEN_BACKLOG` - Listen backlog
    /// - `ROOK_REGISTRY_HINT` - Readiness registry size hint
    /// - `ROOK_EVENTS_PER_WAIT` - Events per readiness wait
    /// - `ROOK_ACCEPTORS_PER_CORE` - Acceptor threads per core
    /// - `ROOK_DATA_WORKERS` - Data worker pool size
    /// - `ROOK_TCP_NODELAY` - Disable Nagle (0/1)
    /// - `ROOK_REACTOR_CORES` - Reactor cores, 0 = auto
    /// - `ROOK_ROUND_BYTES` - Per-round read budget
    /// - `ROOK_ACCEPT_POLICY` - `round-robin` or `pinned`
    /// - `ROOK_PIN_REACTORS` - Pin reactors to CPUs (0/1)
    pub fn from_env() -> Self {
        let base = Self::new();
        Self {
            listen_addr: env_get("ROOK_LISTEN_ADDR", base.listen_addr),
            listen_backlog: env_get("ROOK_LISTEN_BACKLOG", base.listen_backlog),
            registry_hint: env_get("ROOK_REGISTRY_HINT", base.registry_hint),
            events_per_wait: env_get("ROOK_EVENTS_PER_WAIT", base.events_per_wait),
            acceptors_per_core: env_get("ROOK_ACCEPTORS_PER_CORE", base.acceptors_per_core),
            data_workers: env_get("ROOK_DATA_WORKERS", base.data_workers),
            tcp_nodelay: env_get_bool("ROOK_TCP_NODELAY", base.tcp_nodelay),
            reactor_cores: env_get("ROOK_REACTOR_CORES", base.reactor_cores),
            round_bytes: env_get("ROOK_ROUND_BYTES", base.round_bytes),
            accept_policy: env_get_opt("ROOK_ACCEPT_POLICY").unwrap_or(base.accept_policy),
            pin_reactors: env_get_bool("ROOK_PIN_REACTORS", base.pin_reactors),
        }
    }

    /// Create config with library defaults (no env override).
    /// Useful for testing or when you want full control.
    pub fn new() -> Self {
        Self {
            listen_addr: SocketAddr::from((defaults::LISTEN_IP, defaults::LISTEN_PORT)),
            listen_backlog: defaults::LISTEN_BACKLOG,
            registry_hint: defaults::REGISTRY_HINT,
            events_per_wait: defaults::EVENTS_PER_WAIT,
            acceptors_per_core: defaults::ACCEPTORS_PER_CORE,
            data_workers: defaults::DATA_WORKERS,
            tcp_nodelay: defaults::TCP_NODELAY,
            reactor_cores: defaults::REACTOR_CORES,
            round_bytes: defaults::ROUND_BYTES,
            accept_policy: defaults::ACCEPT_POLICY,
            pin_reactors: defaults::PIN_REACTORS,
        }
    }

    // Builder methods

    pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    pub fn listen_backlog(mut self, n: u32) -> Self {
        self.listen_backlog = n;
        self
    }

    pub fn registry_hint(mut self, n: usize) -> Self {
        self.registry_hint = n;
        self
    }

    pub fn events_per_wait(mut self, n: usize) -> Self {
        self.events_per_wait = n;
        self
    }

    pub fn acceptors_per_core(mut self, n: usize) -> Self {
        self.acceptors_per_core = n;
        self
    }

    pub fn data_workers(mut self, n: usize) -> Self {
        self.data_workers = n;
        self
    }

    pub fn tcp_nodelay(mut self, enable: bool) -> Self {
        self.tcp_nodelay = enable;
        self
    }

    pub fn reactor_cores(mut self, n: usize) -> Self {
        self.reactor_cores = n;
        self
    }

    pub fn round_bytes(mut self, n: usize) -> Self {
        self.round_bytes = n;
        self
    }

    pub fn accept_policy(mut self, policy: AcceptPolicy) -> Self {
        self.accept_policy = policy;
        self
    }

    pub fn pin_reactors(mut self, enable: bool) -> Self {
        self.pin_reactors = enable;
        self
    }

    /// Number of reactor cores to run, resolving 0 to available parallelism.
    pub fn resolved_cores(&self) -> usize {
        if self.reactor_cores > 0 {
            return self.reactor_cores;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(MAX_REACTOR_CORES)
    }

    /// Total acceptor threads
    pub fn acceptor_threads(&self) -> usize {
        self.acceptors_per_core * self.resolved_cores()
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_backlog == 0 {
            return Err(ConfigError::InvalidValue("listen_backlog must be > 0"));
        }
        if self.listen_backlog > i32::MAX as u32 {
            return Err(ConfigError::InvalidValue("listen_backlog out of range"));
        }
        if self.events_per_wait == 0 {
            return Err(ConfigError::InvalidValue("events_per_wait must be > 0"));
        }
        if self.events_per_wait > i32::MAX as usize {
            return Err(ConfigError::InvalidValue("events_per_wait out of range"));
        }
        if self.acceptors_per_core == 0 {
            return Err(ConfigError::InvalidValue("acceptors_per_core must be > 0"));
        }
        if self.data_workers == 0 {
            return Err(ConfigError::InvalidValue("data_workers must be > 0"));
        }
        if self.reactor_cores > MAX_REACTOR_CORES {
            return Err(ConfigError::InvalidValue("reactor_cores must be <= 1024"));
        }
        if self.round_bytes == 0 {
            return Err(ConfigError::InvalidValue("round_bytes must be > 0"));
        }
        if self.round_bytes > MAX_ROUND_BYTES {
            return Err(ConfigError::InvalidValue("round_bytes must be <= 16 MiB"));
        }
        Ok(())
    }

    /// Log configuration at startup
    pub fn log(&self) {
        info!(
            listen_addr = %self.listen_addr,
            listen_backlog = self.listen_backlog,
            registry_hint = self.registry_hint,
            events_per_wait = self.events_per_wait,
            reactor_cores = self.resolved_cores(),
            acceptors_per_core = self.acceptors_per_core,
            data_workers = self.data_workers,
            tcp_nodelay = self.tcp_nodelay,
            round_bytes = self.round_bytes,
            accept_policy = %self.accept_policy,
            pin_reactors = self.pin_reactors,
            "server configuration"
        );
    }
}
