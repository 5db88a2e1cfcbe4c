//! Host-authoritative replication.
//!
//! - `message` - Wire envelope and message kinds
//! - `transport` - Transport trait, endpoints and connection deadlines
//! - `memory` - In-process transport
//! - `projection` - Per-peer redacted view of the game
//! - `host` - The session owner: the only writer of game state
//! - `peer` - A joining participant's read-only side
//!
//! ```text
//!   PeerSession ── intents ──▶ HostSession ──▶ GameEngine
//!        ▲                          │
//!        └── state-sync / turn ─────┘ (projection per peer)
//! ```

pub mod host;
pub mod memory;
pub mod message;
pub mod peer;
pub mod projection;
pub mod transport;

pub use host::HostSession;
pub use memory::MemoryTransport;
pub use message::{MessageBody, MoveIntent, PeerMessage};
pub use peer::{PeerSession, TurnPrompt};
pub use projection::project;
pub use transport::{
    establish, host_address, listen, Endpoint, LinkEvent, LinkSender, Transport, TransportError,
};

use crate::state::{GameError, LobbyError, Role};

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Lobby(#[from] LobbyError),
    #[error(transparent)]
    Game(#[from] GameError),
    #[error("Join rejected: {0}")]
    Rejected(String),
    #[error("Removed from session: {0}")]
    Kicked(String),
    #[error("Not allowed to act for {0}")]
    Unauthorized(Role),
    #[error("It is not {0}'s turn")]
    NotYourTurn(Role),
    #[error("No role assigned yet")]
    NoRole,
    #[error("Session closed")]
    Closed,
}
