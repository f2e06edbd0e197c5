//! CBOR-encoded event bodies.
//!
//! The frame header's opcode identifies the event; the body is CBOR with no
//! variant tag of its own. `UserJoined` and `UserLeft` share the
//! [`Notification`] body shape and are distinguished by opcode alone, the
//! same way the source contract distinguishes them by event name.

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::{
    Frame, FrameHeader, Opcode,
    errors::{ProtocolError, Result},
};

/// Client request to bind a username to the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Requested display name.
    pub username: String,
}

/// Client request to send a chat message to the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Message text. The server relays content as-is; empty or
    /// whitespace-only text is not an error.
    pub content: String,
}

/// Client update of its typing indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingRequest {
    /// Whether the client is currently composing.
    pub is_typing: bool,
}

/// A chat message relayed to the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender's display name.
    pub username: String,
    /// Message text.
    pub content: String,
    /// Emission time, milliseconds since the Unix epoch. Monotonic in
    /// emission order only; not unique across connections.
    pub timestamp_ms: u64,
}

/// A join/leave notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Subject's display name.
    pub username: String,
    /// Server-composed notification text.
    pub content: String,
    /// Emission time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl Notification {
    /// Notification for a participant joining the room.
    #[must_use]
    pub fn joined(username: impl Into<String>, timestamp_ms: u64) -> Self {
        let username = username.into();
        let content = format!("{username} joined");
        Self { username, content, timestamp_ms }
    }

    /// Notification for a participant leaving the room.
    #[must_use]
    pub fn left(username: impl Into<String>, timestamp_ms: u64) -> Self {
        let username = username.into();
        let content = format!("{username} left");
        Self { username, content, timestamp_ms }
    }
}

/// A participant's typing indicator state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingState {
    /// Display name of the typing participant.
    pub username: String,
    /// Whether that participant is currently composing.
    pub is_typing: bool,
}

/// All event bodies, paired one-to-one with opcodes.
///
/// # Invariants
///
/// - Each variant maps to exactly one [`Opcode`] via [`Payload::opcode`].
/// - Encoding a payload and decoding it with the same opcode produces an
///   equivalent value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Bind a username (client to server).
    Join(JoinRequest),
    /// Send a chat message (client to server).
    SendMessage(SendMessageRequest),
    /// Typing indicator update (client to server).
    Typing(TypingRequest),
    /// Relayed chat message (server to client).
    Message(ChatMessage),
    /// Join notification (server to client).
    UserJoined(Notification),
    /// Leave notification (server to client).
    UserLeft(Notification),
    /// Relayed typing indicator (server to client).
    TypingUpdate(TypingState),
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Join(_) => Opcode::Join,
            Self::SendMessage(_) => Opcode::SendMessage,
            Self::Typing(_) => Opcode::Typing,
            Self::Message(_) => Opcode::Message,
            Self::UserJoined(_) => Opcode::UserJoined,
            Self::UserLeft(_) => Opcode::UserLeft,
            Self::TypingUpdate(_) => Opcode::TypingUpdate,
        }
    }

    /// Encode the body to a buffer. Only the inner struct is serialized;
    /// the opcode lives in the frame header.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::CborEncode`] if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();

        match self {
            Self::Join(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::SendMessage(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Typing(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Message(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::UserJoined(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::UserLeft(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::TypingUpdate(inner) => ciborium::ser::into_writer(inner, &mut writer),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode a body from bytes according to the opcode.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::PayloadTooLarge`] before any parsing begins
    /// - [`ProtocolError::CborDecode`] on malformed CBOR
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        fn de<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
            ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
        }

        Ok(match opcode {
            Opcode::Join => Self::Join(de(bytes)?),
            Opcode::SendMessage => Self::SendMessage(de(bytes)?),
            Opcode::Typing => Self::Typing(de(bytes)?),
            Opcode::Message => Self::Message(de(bytes)?),
            Opcode::UserJoined => Self::UserJoined(de(bytes)?),
            Opcode::UserLeft => Self::UserLeft(de(bytes)?),
            Opcode::TypingUpdate => Self::TypingUpdate(de(bytes)?),
        })
    }

    /// Convert the payload into a wire frame.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::CborEncode`] if serialization fails
    pub fn into_frame(self) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(Frame::new(FrameHeader::new(self.opcode()), buf))
    }

    /// Parse the typed payload out of a wire frame.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::UnknownOpcode`] if the header opcode is not in the
    ///   vocabulary
    /// - [`ProtocolError::CborDecode`] on a malformed body
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or_else(|| ProtocolError::UnknownOpcode(frame.header.opcode()))?;
        Self::decode(opcode, &frame.payload)
    }
}
