//! Broadcast hub: the server's only shared mutable state.
//!
//! One mutex guards the connection registry together with each
//! connection's outbound queue. `broadcast` encodes an event once, then
//! snapshots the audience and enqueues the encoded bytes for every target
//! under that single lock. Enqueueing to an unbounded channel never
//! blocks, so the critical section is a snapshot plus N pushes, and the
//! lock gives all connections the same relative event order. A slow
//! client only grows its own queue; its writer task drains independently,
//! so one stalled peer cannot delay delivery to the rest.
//!
//! The lock is never held across an await point.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use parley_core::{Audience, ConnectionId, ConnectionRegistry};
use parley_proto::Payload;
use tokio::sync::mpsc;

/// Registry plus per-connection outbound queues, fanned out under one
/// short-critical-section lock.
#[derive(Debug, Default)]
pub struct BroadcastHub {
    inner: Mutex<HubInner>,
}

#[derive(Debug, Default)]
struct HubInner {
    /// Who is online, and under what name.
    registry: ConnectionRegistry,
    /// Connection id to its outbound queue. Kept in lockstep with the
    /// registry: inserted at register, removed at unregister.
    outbound: HashMap<ConnectionId, mpsc::UnboundedSender<Bytes>>,
}

impl BroadcastHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection and its outbound queue.
    pub fn register(&self, outbound: mpsc::UnboundedSender<Bytes>) -> ConnectionId {
        let mut inner = self.lock();
        let id = inner.registry.register();
        inner.outbound.insert(id, outbound);
        id
    }

    /// Bind a username to a connection.
    pub fn bind_username(&self, id: ConnectionId, username: &str) {
        self.lock().registry.bind_username(id, username);
    }

    /// Remove a connection, returning its last bound username (or
    /// `"Anonymous"`). Dropping the outbound sender lets the connection's
    /// writer task wind down after draining what is already queued.
    pub fn unregister(&self, id: ConnectionId) -> String {
        let mut inner = self.lock();
        inner.outbound.remove(&id);
        inner.registry.unregister(id)
    }

    /// Deliver an event to every connection the audience selects.
    ///
    /// Best-effort: a target whose queue is gone (connection tearing
    /// down) is logged and skipped; the failure never reaches the sender
    /// whose action triggered the broadcast and never aborts delivery to
    /// the remaining targets.
    pub fn broadcast(&self, payload: &Payload, audience: Audience) {
        let bytes = match payload.clone().into_frame().and_then(|f| f.to_bytes()) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("failed to encode broadcast event: {e}");
                return;
            },
        };

        let inner = self.lock();
        for entry in inner.registry.snapshot() {
            if !audience.includes(entry.id) {
                continue;
            }
            if let Some(sender) = inner.outbound.get(&entry.id) {
                if sender.send(bytes.clone()).is_err() {
                    tracing::debug!(id = %entry.id, "broadcast target gone, skipping");
                }
            }
        }
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.lock().registry.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        // A poisoned lock means a panic elsewhere; the registry state is
        // still structurally valid, so keep serving.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
