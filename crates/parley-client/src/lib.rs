//! Client library for the Parley chat server.
//!
//! [`ChatClient`] speaks the wire contract from `parley-proto` over a
//! QUIC connection: typed methods for the three inbound events
//! (`join`, `send_message`, `set_typing`) and a decoded [`ServerEvent`]
//! stream for everything the server fans out. Front-end concerns -
//! rendering, input validation, reconnect handling - belong to the
//! consumer, not this crate.

#![forbid(unsafe_code)]

mod client;
mod transport;

pub use client::{ChatClient, ServerEvent};
pub use transport::ClientError;
