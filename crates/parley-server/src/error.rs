//! Server error types.

use thiserror::Error;

/// Errors that can occur in the server runtime.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error (invalid bind address, unreadable TLS files).
    ///
    /// Fatal at startup: the process logs and exits. This is the only
    /// error class that terminates the server.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport error (bind failure, connection failure, I/O error).
    ///
    /// Fatal when raised by `bind`; per-connection occurrences end that
    /// connection only.
    #[error("transport error: {0}")]
    Transport(String),

    /// Wire protocol error on a single connection's stream.
    #[error("protocol error: {0}")]
    Protocol(#[from] parley_proto::ProtocolError),
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
