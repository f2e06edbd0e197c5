//! Parley production server.
//!
//! Glues the Sans-IO chat logic in [`parley_core`] to real I/O: Quinn for
//! QUIC transport, Tokio for the task-per-connection runtime.
//!
//! # Architecture
//!
//! - [`QuicTransport`] accepts connections; each gets its own Tokio task.
//! - A per-connection [`Session`] state machine decides what every inbound
//!   event means and emits actions.
//! - The shared [`BroadcastHub`] executes those actions: it owns the
//!   connection registry and every connection's outbound queue behind one
//!   short-critical-section lock, and fans events out without waiting on
//!   any individual peer.
//!
//! Delivery is best-effort: no acknowledgment, no retry, no history. A
//! failed delivery is logged and skipped, never surfaced to the sender.

#![forbid(unsafe_code)]

mod clock;
mod error;
mod hub;
mod transport;

use std::sync::Arc;

use bytes::Bytes;
pub use clock::SystemClock;
pub use error::ServerError;
pub use hub::BroadcastHub;
use parley_core::{Audience, Clock, ConnectionId, Session, SessionAction};
use parley_proto::{FrameHeader, Notification, Payload};
use tokio::sync::mpsc;
pub use transport::{QuicConnection, QuicTransport};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:4433").
    pub bind_address: String,
    /// Path to a TLS certificate (PEM). Self-signed when absent.
    pub cert_path: Option<String>,
    /// Path to the TLS private key (PEM).
    pub key_path: Option<String>,
    /// Maximum concurrent connections; connections over the cap are
    /// closed at accept time.
    pub max_connections: usize,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            cert_path: None,
            key_path: None,
            max_connections: 10_000,
        }
    }
}

/// Production Parley server.
pub struct Server {
    transport: QuicTransport,
    hub: Arc<BroadcastHub>,
    clock: SystemClock,
    config: ServerRuntimeConfig,
}

impl Server {
    /// Create and bind a new server.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Config`] / [`ServerError::Transport`] on a bad
    ///   address, bad TLS material, or an unbindable socket. Fatal: there
    ///   is nothing to serve without a listener.
    pub fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let transport = QuicTransport::bind(
            &config.bind_address,
            config.cert_path.as_deref(),
            config.key_path.as_deref(),
        )?;

        Ok(Self { transport, hub: Arc::new(BroadcastHub::new()), clock: SystemClock::new(), config })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Run the accept loop until the process is stopped.
    ///
    /// Per-connection failures are contained to their task; only the
    /// listener itself ending is an error here.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("server listening on {}", self.transport.local_addr()?);

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let hub = Arc::clone(&self.hub);
                    let clock = self.clock;
                    let max_connections = self.config.max_connections;

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, hub, clock, max_connections).await
                        {
                            tracing::debug!("connection ended with error: {e}");
                        }
                    });
                },
                Err(e) => {
                    tracing::error!("accept error: {e}");
                },
            }
        }
    }
}

/// Drive one client connection from accept to departure.
async fn handle_connection(
    conn: QuicConnection,
    hub: Arc<BroadcastHub>,
    clock: SystemClock,
    max_connections: usize,
) -> Result<(), ServerError> {
    if hub.connection_count() >= max_connections {
        tracing::warn!(remote = %conn.remote_addr(), "connection limit reached, refusing");
        conn.close(1, b"server full");
        return Ok(());
    }

    // The outbound event stream exists from accept time, so a client that
    // only listens still receives every broadcast.
    let send = conn.open_uni().await?;

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Bytes>();
    let id = hub.register(outbound_tx);
    let mut session = Session::new(id);

    tracing::debug!(%id, remote = %conn.remote_addr(), "connection accepted");

    // Writer task: owns the send stream and drains this connection's
    // queue independently of everyone else's.
    tokio::spawn(write_outbound(id, send, outbound_rx));

    match conn.accept_uni().await {
        Ok(recv) => {
            if let Err(e) = receive_loop(recv, &mut session, &hub, &clock).await {
                tracing::debug!(%id, "receive loop ended: {e}");
            }
        },
        Err(e) => {
            // Connection died before the client ever spoke.
            tracing::debug!(%id, "no inbound stream: {e}");
        },
    }

    // Exactly-once departure: a second disconnect (close racing an I/O
    // error) yields no actions.
    let actions = session.disconnect();
    execute_actions(&hub, id, actions, &clock);

    // No-op when the peer is already gone; ends the connection when the
    // receive loop bailed on an unframeable stream.
    conn.close(0, b"session ended");

    Ok(())
}

/// Decode inbound frames and feed them through the session state machine.
///
/// A malformed body or unknown opcode drops that event and keeps the
/// connection open. Only an unframeable stream (header-level garbage) or
/// a transport error ends the loop.
async fn receive_loop(
    mut recv: quinn::RecvStream,
    session: &mut Session,
    hub: &BroadcastHub,
    clock: &SystemClock,
) -> Result<(), ServerError> {
    let id = session.id();
    let mut header_buf = [0u8; FrameHeader::SIZE];

    loop {
        if recv.read_exact(&mut header_buf).await.is_err() {
            // Peer closed the stream or the transport died.
            return Ok(());
        }

        // Header-level garbage: the stream can no longer be framed.
        let header = *FrameHeader::from_bytes(&header_buf)?;

        let mut payload_buf = vec![0u8; header.payload_size() as usize];
        if !payload_buf.is_empty() && recv.read_exact(&mut payload_buf).await.is_err() {
            return Ok(());
        }

        let Some(opcode) = header.opcode_enum() else {
            tracing::warn!(%id, "unknown opcode {:#06x}, discarding event", header.opcode());
            continue;
        };

        let payload = match Payload::decode(opcode, &payload_buf) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(%id, "failed to decode {opcode:?} event, discarding: {e}");
                continue;
            },
        };

        match session.handle(&payload, clock.now_ms()) {
            Ok(actions) => execute_actions(hub, id, actions, clock),
            Err(e) => {
                tracing::warn!(%id, "dropping event: {e}");
            },
        }
    }
}

/// Writer task body: drain the outbound queue into the send stream.
///
/// Ends when the hub drops the queue sender at unregister (after
/// delivering whatever was already queued) or when the peer goes away.
async fn write_outbound(
    id: ConnectionId,
    mut send: quinn::SendStream,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
) {
    while let Some(bytes) = outbound.recv().await {
        if let Err(e) = send.write_all(&bytes).await {
            tracing::debug!(%id, "outbound write failed: {e}");
            return;
        }
    }
    let _ = send.finish();
}

/// Execute session actions against the shared hub.
fn execute_actions(
    hub: &BroadcastHub,
    id: ConnectionId,
    actions: Vec<SessionAction>,
    clock: &SystemClock,
) {
    for action in actions {
        match action {
            SessionAction::Bind { username } => {
                hub.bind_username(id, &username);
                tracing::info!(%id, %username, "user joined");
            },

            SessionAction::Broadcast { payload, audience } => {
                hub.broadcast(&payload, audience);
            },

            SessionAction::Unregister => {
                let username = hub.unregister(id);
                tracing::info!(%id, %username, "user left");
                hub.broadcast(
                    &Payload::UserLeft(Notification::left(username, clock.now_ms())),
                    Audience::AllExcept(id),
                );
            },
        }
    }
}
