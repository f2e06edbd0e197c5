//! Typed chat client.

use parley_proto::{
    ChatMessage, Frame, FrameHeader, JoinRequest, Notification, Payload, SendMessageRequest,
    TypingRequest, TypingState,
};
use tokio::sync::mpsc;

use crate::transport::{self, ClientError};

/// A decoded server-to-client event, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A chat message (sender included when it is our own echo).
    Message(ChatMessage),
    /// A participant joined.
    UserJoined(Notification),
    /// A participant left.
    UserLeft(Notification),
    /// A participant's typing indicator changed.
    Typing(TypingState),
}

/// A connected chat client.
///
/// Sends happen on the caller's task; received events are decoded by a
/// background reader and drained with [`ChatClient::next_event`].
pub struct ChatClient {
    /// Endpoint kept alive for the duration of the connection.
    _endpoint: quinn::Endpoint,
    /// The QUIC connection, for explicit close.
    connection: quinn::Connection,
    /// Send half of the chat stream.
    send: quinn::SendStream,
    /// Decoded events from the reader task.
    events: mpsc::UnboundedReceiver<ServerEvent>,
}

impl ChatClient {
    /// Connect to a server and open the chat stream.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Connect`] if the server is unreachable or the
    ///   handshake fails
    pub async fn connect(server_addr: &str) -> Result<Self, ClientError> {
        let (endpoint, connection) = transport::connect(server_addr).await?;

        // Our event stream toward the server. The server's stream toward
        // us is picked up by the reader task once the server opens it.
        let send = connection
            .open_uni()
            .await
            .map_err(|e| ClientError::Connect(format!("failed to open chat stream: {e}")))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(read_events(connection.clone(), events_tx));

        Ok(Self { _endpoint: endpoint, connection, send, events: events_rx })
    }

    /// Bind a username to this connection.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Stream`] if the connection is gone
    pub async fn join(&mut self, username: &str) -> Result<(), ClientError> {
        self.send(Payload::Join(JoinRequest { username: username.to_string() })).await
    }

    /// Send a chat message to the room.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Stream`] if the connection is gone
    pub async fn send_message(&mut self, content: &str) -> Result<(), ClientError> {
        self.send(Payload::SendMessage(SendMessageRequest { content: content.to_string() })).await
    }

    /// Update this client's typing indicator.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Stream`] if the connection is gone
    pub async fn set_typing(&mut self, is_typing: bool) -> Result<(), ClientError> {
        self.send(Payload::Typing(TypingRequest { is_typing })).await
    }

    /// Send a raw frame. Escape hatch for tools and tests that need to
    /// put arbitrary (including malformed) frames on the wire.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Protocol`] if the frame cannot be encoded
    /// - [`ClientError::Stream`] if the connection is gone
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<(), ClientError> {
        let bytes = frame.to_bytes()?;
        self.send
            .write_all(&bytes)
            .await
            .map_err(|e| ClientError::Stream(format!("write failed: {e}")))
    }

    /// Next decoded server event. `None` once the connection is closed
    /// and all buffered events are drained.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    /// Close the connection. The server emits the departure notification
    /// for the other participants.
    pub fn close(&self) {
        self.connection.close(0u32.into(), b"leaving");
    }

    async fn send(&mut self, payload: Payload) -> Result<(), ClientError> {
        let frame = payload.into_frame()?;
        self.send_frame(&frame).await
    }
}

/// Reader task body: decode frames off the server's event stream into
/// typed events.
///
/// Frames that do not decode are logged and skipped; the loop ends when
/// the stream does.
async fn read_events(connection: quinn::Connection, events: mpsc::UnboundedSender<ServerEvent>) {
    let mut recv = match connection.accept_uni().await {
        Ok(recv) => recv,
        Err(e) => {
            tracing::debug!("connection closed before the event stream opened: {e}");
            return;
        },
    };

    let mut header_buf = [0u8; FrameHeader::SIZE];

    loop {
        if recv.read_exact(&mut header_buf).await.is_err() {
            return;
        }

        let header = match FrameHeader::from_bytes(&header_buf) {
            Ok(header) => *header,
            Err(e) => {
                tracing::debug!("unframeable server stream: {e}");
                return;
            },
        };

        let mut payload_buf = vec![0u8; header.payload_size() as usize];
        if !payload_buf.is_empty() && recv.read_exact(&mut payload_buf).await.is_err() {
            return;
        }

        let event = match header.opcode_enum().map(|op| Payload::decode(op, &payload_buf)) {
            Some(Ok(Payload::Message(m))) => ServerEvent::Message(m),
            Some(Ok(Payload::UserJoined(n))) => ServerEvent::UserJoined(n),
            Some(Ok(Payload::UserLeft(n))) => ServerEvent::UserLeft(n),
            Some(Ok(Payload::TypingUpdate(t))) => ServerEvent::Typing(t),
            Some(Ok(other)) => {
                tracing::debug!("ignoring unexpected inbound opcode {:?}", other.opcode());
                continue;
            },
            Some(Err(e)) => {
                tracing::debug!("dropping undecodable event: {e}");
                continue;
            },
            None => {
                tracing::debug!("ignoring unknown opcode {:#06x}", header.opcode());
                continue;
            },
        };

        if events.send(event).is_err() {
            // Client dropped its receiver; nothing left to deliver to.
            return;
        }
    }
}
