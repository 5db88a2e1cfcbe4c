//! Game state: rules, economy, lobby and peer tracking.
//!
//! - `role` - Seat identifiers (`mrx`, `d1`..)
//! - `tickets` - Ticket inventories, the bank and transfer rules
//! - `visibility` - What may be shown of Mr. X's moves
//! - `game` - The round/turn state machine
//! - `lobby` - Voting, secret setup and role assignment
//! - `connection` - Host-side peer link tracking
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         GameEngine                           │
//! │                                                              │
//! │  GameState ── rounds: [Arc<RoundData>; 24]                   │
//! │            ── tickets: TicketEconomy (Arc<TicketInventory>)  │
//! │                                                              │
//! │  submit_location ─▶ select_transport ─▶ lock_round           │
//! │                          │                                   │
//! │                          └─▶ undo_move                       │
//! └──────────────────────────────────────────────────────────────┘
//!          ▲                                   │
//!          │ StartParameters                   │ visibility::for_round
//!  ┌───────┴────────┐                   ┌──────▼───────┐
//!  │LobbyCoordinator│                   │  projection  │
//!  └────────────────┘                   └──────────────┘
//! ```

pub mod connection;
pub mod game;
pub mod lobby;
pub mod role;
pub mod tickets;
pub mod visibility;

pub use connection::{LinkStatus, PeerLink, PeerRegistry};
pub use game::{
    GameEngine, GameError, GameState, GameStatus, PlayerEntry, RoundData, RoundOutcome,
    TurnAdvance, MAX_DETECTIVES, MAX_LOCATION, MIN_DETECTIVES, MIN_LOCATION, TOTAL_ROUNDS,
};
pub use lobby::{
    LobbyCoordinator, LobbyError, LobbyPhase, LobbySnapshot, Participant, StartParameters,
    MAX_PARTICIPANTS, MIN_PARTICIPANTS,
};
pub use role::Role;
pub use tickets::{TicketEconomy, TicketError, TicketInventory, TransportMode};
pub use visibility::{is_reveal_round, next_reveal_round, Visibility, REVEAL_ROUNDS};
