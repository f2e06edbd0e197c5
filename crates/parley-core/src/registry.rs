//! Connection registry: the single source of truth for who is online.
//!
//! The registry maps connection ids to their bound usernames. It assigns
//! ids itself, so uniqueness is a structural property rather than a caller
//! obligation, and it keeps entries in id order so snapshots are
//! deterministic.
//!
//! The registry is a plain data structure. Callers provide mutual
//! exclusion; the production server wraps it in one mutex together with
//! the per-connection outbound queues and holds the lock only for
//! snapshot-plus-enqueue critical sections.

use std::collections::BTreeMap;
use std::fmt;

/// Username reported for connections that never bound one.
pub const ANONYMOUS: &str = "Anonymous";

/// Opaque handle identifying one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Broadcast target selector, evaluated against a registry snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every registered connection, sender included.
    All,
    /// Every registered connection except the given one.
    AllExcept(ConnectionId),
}

impl Audience {
    /// Whether the given connection is a delivery target.
    #[must_use]
    pub fn includes(&self, id: ConnectionId) -> bool {
        match self {
            Self::All => true,
            Self::AllExcept(excluded) => *excluded != id,
        }
    }
}

/// One entry of a registry snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    /// Connection id.
    pub id: ConnectionId,
    /// Bound username, if the connection has joined.
    pub username: Option<String>,
}

/// Registry of active connections and their bound identities.
///
/// Entries exist exactly between [`register`](Self::register) and
/// [`unregister`](Self::unregister). A username, once bound, never reverts
/// to unbound for the remaining lifetime of its connection.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Next id to hand out. Monotonic; ids are never reused.
    next_id: u64,
    /// Connection id to bound username.
    entries: BTreeMap<ConnectionId, Option<String>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection with no bound username.
    ///
    /// Infallible: the registry assigns the id, so there is no conflict to
    /// report. The entry is visible to every snapshot taken after this
    /// call returns.
    pub fn register(&mut self) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.entries.insert(id, None);
        id
    }

    /// Bind a username to a connection.
    ///
    /// Last writer wins if called twice (the protocol should not do this,
    /// but a misbehaving peer must not crash the registry). Unknown ids
    /// are a no-op.
    pub fn bind_username(&mut self, id: ConnectionId, username: impl Into<String>) {
        if let Some(entry) = self.entries.get_mut(&id) {
            *entry = Some(username.into());
        }
    }

    /// Remove a connection, returning its last bound username.
    ///
    /// Returns [`ANONYMOUS`] when the connection never joined
    /// or the id is unknown (a registry miss is a no-op, not an error),
    /// so the departure notification always has a name to report.
    pub fn unregister(&mut self, id: ConnectionId) -> String {
        self.entries
            .remove(&id)
            .flatten()
            .unwrap_or_else(|| ANONYMOUS.to_string())
    }

    /// Consistent point-in-time view of all connections, ordered by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RegistryEntry> {
        self.entries
            .iter()
            .map(|(id, username)| RegistryEntry { id: *id, username: username.clone() })
            .collect()
    }

    /// Whether a connection is currently registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
