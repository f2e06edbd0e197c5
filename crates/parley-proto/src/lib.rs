//! Parley wire protocol.
//!
//! Every event on the wire is a [`Frame`]: a fixed 16-byte binary header
//! followed by a CBOR payload body. The header's opcode is the event name;
//! the body shape is determined entirely by the opcode (no variant tag in
//! the body). [`Payload`] covers the full event vocabulary:
//!
//! - Client to server: `Join`, `SendMessage`, `Typing`
//! - Server to client: `Message`, `UserJoined`, `UserLeft`, `TypingUpdate`
//!
//! The crate is pure data and codec - no I/O, no async.

#![forbid(unsafe_code)]

mod errors;
mod frame;
mod header;
mod payloads;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::{FrameHeader, Opcode};
pub use payloads::{
    ChatMessage, JoinRequest, Notification, Payload, SendMessageRequest, TypingRequest,
    TypingState,
};

/// ALPN protocol identifier negotiated during the TLS handshake.
pub const ALPN_PROTOCOL: &[u8] = b"parley";
