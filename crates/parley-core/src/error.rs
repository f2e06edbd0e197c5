//! Error types for the session state machine.

use thiserror::Error;

/// Errors produced while processing inbound session events.
///
/// None of these are fatal to the server: the runtime logs the error,
/// drops the offending event, and keeps the connection open (or, for
/// [`SessionError::Closed`], has already torn it down).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// Event arrived after the session reached its terminal state.
    #[error("session is closed")]
    Closed,

    /// A second join on a session that already bound a username.
    #[error("session already joined")]
    AlreadyJoined,

    /// A server-to-client opcode arrived inbound.
    #[error("unexpected outbound opcode received from client: {0:#06x}")]
    UnexpectedEvent(u16),
}
