//! Runtime error types

use rookery_core::ConfigError;

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Startup failure; nothing is left running when one is returned
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to create readiness registry for core {core}: {source}")]
    Registry {
        core: usize,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Why one accepted socket could not be admitted
#[derive(Debug, Error)]
pub enum AdmitError {
    #[error("socket setup failed: {0}")]
    Setup(#[source] io::Error),

    #[error("connection arena exhausted")]
    ArenaFull,

    #[error("registration failed: {0}")]
    Register(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
