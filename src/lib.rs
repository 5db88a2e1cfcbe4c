//! Yard Referee
//!
//! Rule engine and host-authoritative replication for a hidden-movement pursuit
//! board game: one player (Mr. X) moves in secret across a numbered board while
//! two to five detectives try to land on the same spot within 24 rounds.
//!
//! # Overview
//!
//! - **Game Engine** - Round/turn state machine with capture and win detection,
//!   double moves, undo, and a ticket economy where detectives fund Mr. X.
//!
//! - **Visibility** - One rule decides what may be shown of Mr. X's moves; the
//!   replication layer and every display go through it.
//!
//! - **Lobby** - Ready check, vote for Mr. X, secret setup and role assignment.
//!
//! - **Replication** - The host owns the only writable state; peers receive
//!   redacted projections and send intents over an injected transport.
//!
//! - **Persistence** - Background, debounced snapshots into a session store.
//!
//! # Design Principles
//!
//! 1. **State machines validate transitions** - Invalid moves are rejected with
//!    clear errors and leave state untouched.
//!
//! 2. **Copy-on-write snapshots** - Rounds and inventories sit behind `Arc`, so
//!    projections and persistence clone cheaply.
//!
//! 3. **One writer** - Only the host mutates game state, one event at a time.
//!
//! # Example
//!
//! ```rust
//! use yard_referee::state::{GameEngine, Role, TransportMode, TurnAdvance};
//!
//! let mut engine = GameEngine::new();
//! engine.start(3, "1234").unwrap();
//!
//! engine.submit_location(50).unwrap();
//! let next = engine.select_transport(TransportMode::Taxi, false).unwrap();
//! assert_eq!(next, TurnAdvance::Next(Role::Detective(1)));
//! ```

pub mod config;
pub mod logging;
pub mod net;
pub mod state;
pub mod store;

// Re-export everything from state module at crate root
pub use state::*;
