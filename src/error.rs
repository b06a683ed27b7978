//! Daemon-level error types

use crate::base::neterror::NetError;
use thiserror::Error;

/// Result type alias for daemon operations
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Errors that stop the daemon or one of its setup steps.
///
/// Per-request failures never surface here; they travel back to the client
/// as `{"error": ...}` items.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to parse configuration file
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Neither the preferred nor an ephemeral port could be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed character table
    #[error("invalid character table: {0}")]
    CharMap(#[from] serde_json::Error),

    /// The daemon did not publish a port in time
    #[error("daemon not available: {0}")]
    Unavailable(String),

    /// Network error talking to the daemon
    #[error(transparent)]
    Net(#[from] NetError),
}
