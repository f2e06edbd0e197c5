//! Sans-IO core of the Parley chat server.
//!
//! Pure logic only: the [`ConnectionRegistry`] tracks who is online, a
//! [`Session`] state machine drives each connection's lifecycle, and
//! [`Audience`] selects broadcast targets. Methods take time as a
//! parameter and return actions for a runtime to execute, so every path
//! is testable without a socket or a clock.
//!
//! The production runtime lives in `parley-server`; a deterministic test
//! can drive the same types directly.

#![forbid(unsafe_code)]

mod clock;
mod error;
mod registry;
mod session;

pub use clock::Clock;
pub use error::SessionError;
pub use registry::{ANONYMOUS, Audience, ConnectionId, ConnectionRegistry, RegistryEntry};
pub use session::{MAX_USERNAME_LEN, Session, SessionAction, SessionState};
