//! Per-connection session state machine.
//!
//! One `Session` per connection, exclusively owned by that connection's
//! task. Uses the action pattern: inputs are decoded payloads plus the
//! current time, outputs are [`SessionAction`]s for the runtime to
//! execute. The machine itself touches no registry and no socket, which
//! keeps every transition testable in isolation.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────┐  Join(name)   ┌──────────────┐
//! │ Unjoined │──────────────>│ Joined(name) │
//! └──────────┘               └──────────────┘
//!      │                            │
//!      │ disconnect                 │ disconnect
//!      ↓                            ↓
//! ┌────────┐                   ┌────────┐
//! │ Closed │<──────────────────│ Closed │
//! └────────┘                   └────────┘
//! ```
//!
//! `SendMessage` and `Typing` are self-loops in both live states; before a
//! join they relay under the `"Anonymous"` name rather than being
//! rejected, matching the permissive behavior of the original service.

use parley_proto::{ChatMessage, Notification, Payload, TypingState};

use crate::{
    error::SessionError,
    registry::{ANONYMOUS, Audience, ConnectionId},
};

/// Maximum username length in bytes. Longer names are truncated at a
/// UTF-8 boundary rather than rejected.
pub const MAX_USERNAME_LEN: usize = 128;

/// Actions returned by the session state machine.
///
/// The runtime executes these in order against its shared hub:
/// `Bind` updates the registry, `Broadcast` fans an event out to the
/// selected audience, and `Unregister` removes the connection and
/// broadcasts the departure under the registry-reported username.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Bind this connection's username in the registry.
    Bind {
        /// Username to bind (already length-clamped).
        username: String,
    },

    /// Deliver an event to the selected audience.
    Broadcast {
        /// Event to deliver.
        payload: Payload,
        /// Target selector.
        audience: Audience,
    },

    /// Remove this connection from the registry. The runtime broadcasts
    /// the departure notification using `unregister`'s returned username,
    /// so never-joined connections depart as `"Anonymous"`.
    Unregister,
}

/// Session lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no username bound yet.
    Unjoined,
    /// Username bound; immutable for the rest of the session.
    Joined(String),
    /// Disconnected. Terminal.
    Closed,
}

/// Per-connection session state machine.
#[derive(Debug, Clone)]
pub struct Session {
    /// Registry id of the owning connection.
    id: ConnectionId,
    /// Current lifecycle state.
    state: SessionState,
}

impl Session {
    /// Create a session for a freshly registered connection.
    #[must_use]
    pub fn new(id: ConnectionId) -> Self {
        Self { id, state: SessionState::Unjoined }
    }

    /// Registry id of the owning connection.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Effective username: the bound name, or `"Anonymous"` before a join.
    #[must_use]
    pub fn username(&self) -> &str {
        match &self.state {
            SessionState::Joined(name) => name,
            SessionState::Unjoined | SessionState::Closed => ANONYMOUS,
        }
    }

    /// Process one inbound event.
    ///
    /// `now_ms` is the emission timestamp stamped onto outbound events
    /// (milliseconds since the Unix epoch).
    ///
    /// # Errors
    ///
    /// - [`SessionError::Closed`] after disconnect
    /// - [`SessionError::AlreadyJoined`] on a second join; the runtime
    ///   logs and drops it, the connection stays open
    /// - [`SessionError::UnexpectedEvent`] for server-to-client opcodes
    ///   arriving inbound; likewise dropped without closing
    pub fn handle(
        &mut self,
        payload: &Payload,
        now_ms: u64,
    ) -> Result<Vec<SessionAction>, SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }

        match payload {
            Payload::Join(req) => self.handle_join(&req.username, now_ms),

            Payload::SendMessage(req) => {
                let message = ChatMessage {
                    username: self.username().to_string(),
                    content: req.content.clone(),
                    timestamp_ms: now_ms,
                };
                Ok(vec![SessionAction::Broadcast {
                    payload: Payload::Message(message),
                    audience: Audience::All,
                }])
            },

            Payload::Typing(req) => {
                let typing = TypingState {
                    username: self.username().to_string(),
                    is_typing: req.is_typing,
                };
                Ok(vec![SessionAction::Broadcast {
                    payload: Payload::TypingUpdate(typing),
                    audience: Audience::AllExcept(self.id),
                }])
            },

            Payload::Message(_)
            | Payload::UserJoined(_)
            | Payload::UserLeft(_)
            | Payload::TypingUpdate(_) => {
                Err(SessionError::UnexpectedEvent(payload.opcode().to_u16()))
            },
        }
    }

    /// Handle the connection going away (explicit close or I/O error).
    ///
    /// The first call transitions to `Closed` and yields the unregister
    /// action; every later call returns no actions, so the departure
    /// notification is emitted exactly once even when an explicit close
    /// races a transport error.
    pub fn disconnect(&mut self) -> Vec<SessionAction> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }

        self.state = SessionState::Closed;
        vec![SessionAction::Unregister]
    }

    fn handle_join(
        &mut self,
        requested: &str,
        now_ms: u64,
    ) -> Result<Vec<SessionAction>, SessionError> {
        if matches!(self.state, SessionState::Joined(_)) {
            return Err(SessionError::AlreadyJoined);
        }

        let username = clamp_username(requested);
        self.state = SessionState::Joined(username.clone());

        Ok(vec![
            SessionAction::Bind { username: username.clone() },
            SessionAction::Broadcast {
                payload: Payload::UserJoined(Notification::joined(username, now_ms)),
                audience: Audience::AllExcept(self.id),
            },
        ])
    }
}

/// Clamp a username to [`MAX_USERNAME_LEN`] bytes at a char boundary.
fn clamp_username(name: &str) -> String {
    if name.len() <= MAX_USERNAME_LEN {
        return name.to_string();
    }

    let mut end = MAX_USERNAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

#[cfg(test)]
mod tests {
    use parley_proto::{JoinRequest, SendMessageRequest, TypingRequest};

    use super::*;
    use crate::registry::ConnectionRegistry;

    fn session() -> (Session, ConnectionId) {
        let mut registry = ConnectionRegistry::new();
        let id = registry.register();
        (Session::new(id), id)
    }

    fn join(name: &str) -> Payload {
        Payload::Join(JoinRequest { username: name.to_string() })
    }

    fn message(content: &str) -> Payload {
        Payload::SendMessage(SendMessageRequest { content: content.to_string() })
    }

    fn typing(is_typing: bool) -> Payload {
        Payload::Typing(TypingRequest { is_typing })
    }

    #[test]
    fn join_binds_and_notifies_all_except_self() {
        let (mut session, id) = session();

        let actions = session.handle(&join("alice"), 100).unwrap();

        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0], SessionAction::Bind { username: "alice".to_string() });
        match &actions[1] {
            SessionAction::Broadcast { payload: Payload::UserJoined(n), audience } => {
                assert_eq!(n.username, "alice");
                assert_eq!(n.content, "alice joined");
                assert_eq!(n.timestamp_ms, 100);
                assert_eq!(*audience, Audience::AllExcept(id));
            },
            other => panic!("expected join broadcast, got {other:?}"),
        }
        assert_eq!(session.state(), &SessionState::Joined("alice".to_string()));
    }

    #[test]
    fn message_after_join_broadcasts_to_all() {
        let (mut session, _) = session();
        session.handle(&join("alice"), 100).unwrap();

        let actions = session.handle(&message("hi"), 200).unwrap();

        assert_eq!(actions.len(), 1);
        match &actions[0] {
            SessionAction::Broadcast { payload: Payload::Message(m), audience } => {
                assert_eq!(m.username, "alice");
                assert_eq!(m.content, "hi");
                assert_eq!(m.timestamp_ms, 200);
                assert_eq!(*audience, Audience::All);
            },
            other => panic!("expected message broadcast, got {other:?}"),
        }
    }

    #[test]
    fn typing_excludes_sender() {
        let (mut session, id) = session();
        session.handle(&join("bob"), 0).unwrap();

        let actions = session.handle(&typing(true), 10).unwrap();

        match &actions[0] {
            SessionAction::Broadcast { payload: Payload::TypingUpdate(t), audience } => {
                assert_eq!(t.username, "bob");
                assert!(t.is_typing);
                assert_eq!(*audience, Audience::AllExcept(id));
            },
            other => panic!("expected typing broadcast, got {other:?}"),
        }
    }

    #[test]
    fn message_before_join_relays_as_anonymous() {
        let (mut session, _) = session();

        let actions = session.handle(&message("hello?"), 5).unwrap();

        match &actions[0] {
            SessionAction::Broadcast { payload: Payload::Message(m), .. } => {
                assert_eq!(m.username, ANONYMOUS);
                assert_eq!(m.content, "hello?");
            },
            other => panic!("expected message broadcast, got {other:?}"),
        }
        assert_eq!(session.state(), &SessionState::Unjoined);
    }

    #[test]
    fn typing_before_join_relays_as_anonymous() {
        let (mut session, _) = session();

        let actions = session.handle(&typing(true), 5).unwrap();

        match &actions[0] {
            SessionAction::Broadcast { payload: Payload::TypingUpdate(t), .. } => {
                assert_eq!(t.username, ANONYMOUS);
            },
            other => panic!("expected typing broadcast, got {other:?}"),
        }
    }

    #[test]
    fn empty_message_content_is_relayed() {
        let (mut session, _) = session();
        session.handle(&join("alice"), 0).unwrap();

        let actions = session.handle(&message(""), 1).unwrap();
        match &actions[0] {
            SessionAction::Broadcast { payload: Payload::Message(m), .. } => {
                assert_eq!(m.content, "");
            },
            other => panic!("expected message broadcast, got {other:?}"),
        }
    }

    #[test]
    fn second_join_is_rejected_without_state_change() {
        let (mut session, _) = session();
        session.handle(&join("alice"), 0).unwrap();

        let result = session.handle(&join("mallory"), 1);

        assert_eq!(result, Err(SessionError::AlreadyJoined));
        assert_eq!(session.state(), &SessionState::Joined("alice".to_string()));
    }

    #[test]
    fn outbound_opcodes_inbound_are_rejected() {
        let (mut session, _) = session();

        let payload = Payload::Message(ChatMessage {
            username: "spoof".to_string(),
            content: "fake".to_string(),
            timestamp_ms: 0,
        });
        let result = session.handle(&payload, 0);

        assert!(matches!(result, Err(SessionError::UnexpectedEvent(_))));
        assert_eq!(session.state(), &SessionState::Unjoined);
    }

    #[test]
    fn disconnect_unregisters_exactly_once() {
        let (mut session, _) = session();
        session.handle(&join("alice"), 0).unwrap();

        assert_eq!(session.disconnect(), vec![SessionAction::Unregister]);
        // A racing second disconnect (explicit close then I/O error) is
        // silent.
        assert_eq!(session.disconnect(), Vec::new());
        assert_eq!(session.disconnect(), Vec::new());
    }

    #[test]
    fn events_after_disconnect_fail() {
        let (mut session, _) = session();
        session.disconnect();

        assert_eq!(session.handle(&message("late"), 0), Err(SessionError::Closed));
    }

    #[test]
    fn long_username_is_truncated_at_char_boundary() {
        let (mut session, _) = session();

        // 'é' is two bytes; an odd byte limit would split it.
        let long: String = "é".repeat(MAX_USERNAME_LEN);
        let actions = session.handle(&join(&long), 0).unwrap();

        match &actions[0] {
            SessionAction::Bind { username } => {
                assert!(username.len() <= MAX_USERNAME_LEN);
                assert!(username.chars().all(|c| c == 'é'));
            },
            other => panic!("expected bind, got {other:?}"),
        }
    }

    #[test]
    fn short_username_is_untouched() {
        let (mut session, _) = session();

        let actions = session.handle(&join("carol"), 0).unwrap();
        assert_eq!(actions[0], SessionAction::Bind { username: "carol".to_string() });
    }
}
