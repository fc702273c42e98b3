//! Startup errors and process exit codes.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::ConfigError;
use crate::error::ClientError;

/// Exit code constants.
pub mod codes {
    /// Graceful shutdown.
    pub const SUCCESS: u8 = 0;
    /// Invalid configuration or arguments.
    pub const CONFIG_ERROR: u8 = 1;
    /// The listen address could not be bound.
    pub const BIND_ERROR: u8 = 2;
    /// Fail2ban was unreachable at startup and fail-fast is enabled.
    pub const FAIL2BAN_UNREACHABLE: u8 = 3;
}

/// Errors that stop the exporter before or while starting up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Fail2ban unreachable at startup: {0}")]
    Unreachable(#[from] ClientError),

    #[error(transparent)]
    Runtime(#[from] anyhow::Error),
}

/// Map a startup error to an exit code.
pub fn exit_code(error: &StartupError) -> u8 {
    match error {
        StartupError::Config(_) | StartupError::Logging(_) => codes::CONFIG_ERROR,
        StartupError::Bind { .. } => codes::BIND_ERROR,
        StartupError::Unreachable(_) => codes::FAIL2BAN_UNREACHABLE,
        StartupError::Runtime(_) => codes::CONFIG_ERROR,
    }
}
