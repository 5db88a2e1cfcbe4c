//! Game state management.
//!
//! Tracks one game: the role list, the fixed sequence of rounds, whose turn it
//! is, the ticket economy and the outcome. [`GameEngine`] is the only writer.
//!
//! # Turn Cycle
//!
//! ```text
//!  start ──▶ Playing ─────────────────────────────────────────────┐
//!              │                                                  │
//!              │  per round, in role order:                       │
//!              │    submit_location ──▶ select_transport          │
//!              │          ▲                   │                   │
//!              │          └── second leg ─────┤ (Mr. X, 2x ticket)│
//!              │                              ▼                   │
//!              │                     round complete ──▶ lock_round│
//!              │                                          │       │
//!              │        ┌────────── next round ◀──────────┤       │
//!              │        ▼                                 ▼       │
//!              └──── Playing                 DetectivesWin / MrXWins
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::role::Role;
use super::tickets::{TicketEconomy, TicketError, TransportMode};

/// Rounds per game.
pub const TOTAL_ROUNDS: u8 = 24;

/// Lowest board location.
pub const MIN_LOCATION: u16 = 1;

/// Highest board location.
pub const MAX_LOCATION: u16 = 200;

/// Fewest detectives a game can start with.
pub const MIN_DETECTIVES: u8 = 2;

/// Most detectives a game can start with.
pub const MAX_DETECTIVES: u8 = 5;

/// Game state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GameStatus {
    /// No game started yet
    #[default]
    #[serde(rename = "setup")]
    Setup,
    /// Rounds in progress
    #[serde(rename = "playing")]
    Playing,
    /// A detective landed on Mr. X
    #[serde(rename = "detectives_win")]
    DetectivesWin,
    /// Mr. X survived or the detectives ran dry
    #[serde(rename = "mrx_wins")]
    MrXWins,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Playing => "playing",
            Self::DetectivesWin => "detectives_win",
            Self::MrXWins => "mrx_wins",
        }
    }

    /// Check if game is active (can receive moves).
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Playing)
    }

    /// Check if game is terminal (cannot change).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::DetectivesWin | Self::MrXWins)
    }
}

/// One role's move in one round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerEntry {
    pub location: Option<u16>,
    pub transport: Option<TransportMode>,
    /// Mr. X took two legs this round
    #[serde(default)]
    pub double_move: bool,
    pub second_location: Option<u16>,
    pub second_transport: Option<TransportMode>,
    /// Detective with no ordinary tickets, passed without moving
    #[serde(default)]
    pub stranded: bool,
}

impl PlayerEntry {
    /// The role has finished acting for the round.
    pub fn is_committed(&self) -> bool {
        if self.stranded {
            return true;
        }
        self.transport.is_some() && (!self.double_move || self.second_transport.is_some())
    }

    /// Anything recorded that undo would have to reverse.
    pub fn is_touched(&self) -> bool {
        self.stranded || self.transport.is_some()
    }

    /// Where the role ends the round.
    pub fn effective_location(&self) -> Option<u16> {
        if self.double_move {
            self.second_location.or(self.location)
        } else {
            self.location
        }
    }
}

/// One round of the game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundData {
    pub round_number: u8,
    pub entries: BTreeMap<Role, PlayerEntry>,
    pub locked: bool,
    pub manual_reveal: bool,
}

impl RoundData {
    pub fn new(round_number: u8, roles: &[Role]) -> Self {
        Self {
            round_number,
            entries: roles.iter().map(|r| (*r, PlayerEntry::default())).collect(),
            locked: false,
            manual_reveal: false,
        }
    }

    pub fn entry(&self, role: Role) -> Option<&PlayerEntry> {
        self.entries.get(&role)
    }

    /// Every role has acted.
    pub fn is_complete(&self) -> bool {
        self.entries.values().all(PlayerEntry::is_committed)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|e| !e.is_touched())
    }
}

/// Full game snapshot.
///
/// Rounds are held behind `Arc`: a clone shares every round, and the engine
/// only copies the round a move actually touches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    pub status: GameStatus,
    pub roles: Vec<Role>,
    pub rounds: Vec<Arc<RoundData>>,
    /// 1-indexed
    pub current_round: u8,
    /// Index into `roles`, scoped to the current round
    pub current_player_index: usize,
    pub tickets: TicketEconomy,
    /// Mr. X's secret, stripped from every projection
    pub secret: Option<String>,
    pub caught_by: Option<Role>,
    pub caught_in_round: Option<u8>,
    /// Mr. X owes the second leg of a double move
    #[serde(default)]
    pub awaiting_second_leg: bool,
}

impl GameState {
    pub fn detective_count(&self) -> usize {
        self.roles.iter().filter(|r| r.is_detective()).count()
    }

    pub fn is_over(&self) -> bool {
        self.status.is_terminal()
    }

    /// Round by 1-indexed number.
    pub fn round(&self, round_number: u8) -> Option<&RoundData> {
        let idx = usize::from(round_number).checked_sub(1)?;
        self.rounds.get(idx).map(|r| r.as_ref())
    }

    pub fn current_round_data(&self) -> Option<&RoundData> {
        self.round(self.current_round)
    }

    /// Role that must act next, if any.
    pub fn current_role(&self) -> Option<Role> {
        if !self.status.is_active() {
            return None;
        }
        let round = self.current_round_data()?;
        let role = *self.roles.get(self.current_player_index)?;
        if round.entry(role).is_some_and(|e| e.is_committed()) {
            return None;
        }
        Some(role)
    }

    pub fn is_round_complete(&self) -> bool {
        self.status.is_active() && self.current_round_data().is_some_and(RoundData::is_complete)
    }

    /// Copy without Mr. X's secret.
    pub fn without_secret(&self) -> Self {
        Self {
            secret: None,
            ..self.clone()
        }
    }
}

/// What happens after a transport is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnAdvance {
    /// Same role, second leg of a double move
    SecondLeg(Role),
    /// Another role is up
    Next(Role),
    /// Everyone has acted; the round awaits locking
    RoundComplete,
}

/// Result of locking a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    Continue { next_round: u8 },
    DetectivesWin { captor: Role, round: u8 },
    MrXWins { round: u8 },
}

/// Game errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("A game is already in progress")]
    GameInProgress,
    #[error("Game is not active")]
    NotPlaying,
    #[error("Detective count must be between 2 and 5, got {0}")]
    InvalidDetectiveCount(u8),
    #[error("Mr. X's secret must not be empty")]
    EmptySecret,
    #[error("Enter a valid location (1-200), got {0}")]
    InvalidLocation(u16),
    #[error("Location {location} is already held by {by}")]
    LocationOccupied { location: u16, by: Role },
    #[error("Every role has moved; lock the round first")]
    RoundComplete,
    #[error("Round {0} is not complete")]
    RoundIncomplete(u8),
    #[error("No location submitted yet")]
    NoPendingLocation,
    #[error("Unknown role {0}")]
    UnknownRole(Role),
    #[error("{0} has nothing to undo this round")]
    NothingToUndo(Role),
    #[error("Round {0} is locked")]
    RoundLocked(u8),
    #[error("Round {0} is not locked yet")]
    RoundNotLocked(u8),
    #[error("No round {0}")]
    UnknownRound(u8),
    #[error(transparent)]
    Tickets(#[from] TicketError),
}

/// The only writer of [`GameState`].
#[derive(Debug, Clone, Default)]
pub struct GameEngine {
    state: GameState,
    /// Location awaiting a transport choice
    pending: Option<u16>,
}

impl GameEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a stored snapshot.
    pub fn from_state(state: GameState) -> Self {
        Self {
            state,
            pending: None,
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn pending_location(&self) -> Option<u16> {
        self.pending
    }

    pub fn current_role(&self) -> Option<Role> {
        self.state.current_role()
    }

    /// Start a new game.
    pub fn start(&mut self, detective_count: u8, secret: &str) -> Result<(), GameError> {
        if self.state.status.is_active() {
            return Err(GameError::GameInProgress);
        }
        if !(MIN_DETECTIVES..=MAX_DETECTIVES).contains(&detective_count) {
            return Err(GameError::InvalidDetectiveCount(detective_count));
        }
        if secret.is_empty() {
            return Err(GameError::EmptySecret);
        }

        let roles = Role::roster(detective_count);
        self.state = GameState {
            status: GameStatus::Playing,
            rounds: (1..=TOTAL_ROUNDS)
                .map(|n| Arc::new(RoundData::new(n, &roles)))
                .collect(),
            tickets: TicketEconomy::new(&roles),
            roles,
            current_round: 1,
            current_player_index: 0,
            secret: Some(secret.to_string()),
            caught_by: None,
            caught_in_round: None,
            awaiting_second_leg: false,
        };
        self.pending = None;

        info!(detectives = detective_count, "game started");
        Ok(())
    }

    /// Back to setup.
    pub fn reset(&mut self) {
        self.state = GameState::default();
        self.pending = None;
    }

    /// Check a guess against Mr. X's secret.
    pub fn verify_secret(&self, guess: &str) -> bool {
        self.state.secret.as_deref() == Some(guess)
    }

    fn actor(&self) -> Result<Role, GameError> {
        if !self.state.status.is_active() {
            return Err(GameError::NotPlaying);
        }
        self.state.current_role().ok_or(GameError::RoundComplete)
    }

    fn round_index(&self) -> usize {
        usize::from(self.state.current_round).saturating_sub(1)
    }

    fn current_round_mut(&mut self) -> &mut RoundData {
        let idx = self.round_index();
        Arc::make_mut(&mut self.state.rounds[idx])
    }

    fn current_entry(&self, role: Role) -> Option<&PlayerEntry> {
        self.state.current_round_data().and_then(|r| r.entry(role))
    }

    /// Where a detective stood at the end of the last locked round.
    fn carried_over(&self, role: Role) -> Option<u16> {
        let previous = self.state.current_round.checked_sub(1)?;
        self.state
            .round(previous)
            .filter(|r| r.locked)
            .and_then(|r| r.entry(role))
            .and_then(PlayerEntry::effective_location)
    }

    /// Where a detective stands right now for collision purposes.
    fn occupied_by(&self, role: Role) -> Option<u16> {
        match self.current_entry(role) {
            Some(entry) if entry.location.is_some() => entry.location,
            _ => self.carried_over(role),
        }
    }

    /// Validate and hold a location until the transport is chosen.
    pub fn submit_location(&mut self, location: u16) -> Result<(), GameError> {
        let role = self.actor()?;
        if !(MIN_LOCATION..=MAX_LOCATION).contains(&location) {
            return Err(GameError::InvalidLocation(location));
        }

        if role.is_detective() {
            let clash = self
                .state
                .roles
                .iter()
                .copied()
                .filter(|other| other.is_detective() && *other != role)
                .find(|other| self.occupied_by(*other) == Some(location));
            if let Some(by) = clash {
                return Err(GameError::LocationOccupied { location, by });
            }
        }

        self.pending = Some(location);
        Ok(())
    }

    /// Drop a held location.
    pub fn cancel_pending(&mut self) {
        self.pending = None;
    }

    /// Pay for and commit the held location.
    pub fn select_transport(
        &mut self,
        mode: TransportMode,
        use_double_move: bool,
    ) -> Result<TurnAdvance, GameError> {
        let role = self.actor()?;
        let location = self.pending.ok_or(GameError::NoPendingLocation)?;

        if self.state.awaiting_second_leg {
            self.state.tickets.charge(role, mode)?;
            let entry = self.current_round_mut().entries.entry(role).or_default();
            entry.second_location = Some(location);
            entry.second_transport = Some(mode);
            self.state.awaiting_second_leg = false;
            self.pending = None;
            debug!(%role, location, %mode, "second leg committed");
            let from = self.state.current_player_index + 1;
            return Ok(self.seek_actor(from));
        }

        let double = use_double_move && self.state.tickets.has_double_move(role);
        let mut tickets = self.state.tickets.clone();
        tickets.charge(role, mode)?;
        if double {
            tickets.spend_double_move(role)?;
        }
        self.state.tickets = tickets;

        let entry = self.current_round_mut().entries.entry(role).or_default();
        *entry = PlayerEntry {
            location: Some(location),
            transport: Some(mode),
            double_move: double,
            ..PlayerEntry::default()
        };
        self.pending = None;
        debug!(%role, location, %mode, double, "move committed");

        if double {
            self.state.awaiting_second_leg = true;
            return Ok(TurnAdvance::SecondLeg(role));
        }
        let from = self.state.current_player_index + 1;
        Ok(self.seek_actor(from))
    }

    /// Pass a detective who cannot pay for any move.
    fn strand(&mut self, role: Role) {
        let location = self.carried_over(role);
        let entry = self.current_round_mut().entries.entry(role).or_default();
        *entry = PlayerEntry {
            location,
            stranded: true,
            ..PlayerEntry::default()
        };
        debug!(%role, "detective out of tickets, passing");
    }

    /// Point the turn at the next role that still has to act, starting at `from`
    /// and wrapping within the round.
    fn seek_actor(&mut self, from: usize) -> TurnAdvance {
        let n = self.state.roles.len();
        for step in 0..n {
            let idx = (from + step) % n;
            let role = self.state.roles[idx];
            if self.current_entry(role).is_some_and(PlayerEntry::is_committed) {
                continue;
            }
            if role.is_detective() && self.state.tickets.exhausted(role) {
                self.strand(role);
                continue;
            }
            self.state.current_player_index = idx;
            return TurnAdvance::Next(role);
        }
        self.state.current_player_index = 0;
        TurnAdvance::RoundComplete
    }

    /// Take back a role's move this round, and every later role's with it.
    pub fn undo_move(&mut self, role: Role) -> Result<Role, GameError> {
        if !self.state.status.is_active() {
            return Err(GameError::NotPlaying);
        }
        let position = self
            .state
            .roles
            .iter()
            .position(|r| *r == role)
            .ok_or(GameError::UnknownRole(role))?;
        let round = self
            .state
            .current_round_data()
            .ok_or(GameError::UnknownRound(self.state.current_round))?;
        if round.locked {
            return Err(GameError::RoundLocked(round.round_number));
        }
        if !round.entry(role).is_some_and(PlayerEntry::is_touched) {
            return Err(GameError::NothingToUndo(role));
        }

        let mut tickets = self.state.tickets.clone();
        let mut cleared = Vec::new();
        for later in self.state.roles[position..].iter().rev() {
            let Some(entry) = round.entry(*later) else {
                continue;
            };
            if !entry.is_touched() {
                continue;
            }
            if !entry.stranded {
                if let Some(second) = entry.second_transport {
                    tickets.refund(*later, second)?;
                }
                if entry.double_move {
                    tickets.refund_double_move(*later)?;
                }
                if let Some(first) = entry.transport {
                    tickets.refund(*later, first)?;
                }
            }
            cleared.push(*later);
        }

        self.state.tickets = tickets;
        let round = self.current_round_mut();
        for r in &cleared {
            round.entries.insert(*r, PlayerEntry::default());
        }
        self.state.awaiting_second_leg = false;
        self.pending = None;
        debug!(%role, undone = cleared.len(), "moves undone");

        match self.seek_actor(position) {
            TurnAdvance::Next(next) | TurnAdvance::SecondLeg(next) => Ok(next),
            TurnAdvance::RoundComplete => Ok(role),
        }
    }

    /// Close the round: detect capture, check the end conditions, move on.
    pub fn lock_round(&mut self) -> Result<RoundOutcome, GameError> {
        if !self.state.status.is_active() {
            return Err(GameError::NotPlaying);
        }
        let round_number = self.state.current_round;
        let round = self
            .state
            .current_round_data()
            .ok_or(GameError::UnknownRound(round_number))?;
        if !round.is_complete() {
            return Err(GameError::RoundIncomplete(round_number));
        }

        let hidden = round
            .entry(Role::MrX)
            .and_then(PlayerEntry::effective_location);
        let captor = self
            .state
            .roles
            .iter()
            .copied()
            .filter(Role::is_detective)
            .find(|d| hidden.is_some() && round.entry(*d).and_then(|e| e.location) == hidden);

        self.current_round_mut().locked = true;
        self.pending = None;

        if let Some(captor) = captor {
            self.state.status = GameStatus::DetectivesWin;
            self.state.caught_by = Some(captor);
            self.state.caught_in_round = Some(round_number);
            info!(%captor, round = round_number, "mr x caught");
            return Ok(RoundOutcome::DetectivesWin {
                captor,
                round: round_number,
            });
        }

        let stranded = self
            .state
            .roles
            .iter()
            .filter(|r| r.is_detective())
            .all(|d| self.state.tickets.exhausted(*d));
        if stranded || round_number >= TOTAL_ROUNDS {
            self.state.status = GameStatus::MrXWins;
            info!(round = round_number, stranded, "mr x escapes");
            return Ok(RoundOutcome::MrXWins {
                round: round_number,
            });
        }

        self.state.current_round = round_number + 1;
        self.seek_actor(0);
        debug!(round = round_number, "round locked");
        Ok(RoundOutcome::Continue {
            next_round: round_number + 1,
        })
    }

    /// Flip the display-only reveal flag on a locked round.
    pub fn toggle_manual_reveal(&mut self, round_number: u8) -> Result<bool, GameError> {
        let idx = usize::from(round_number)
            .checked_sub(1)
            .filter(|i| *i < self.state.rounds.len())
            .ok_or(GameError::UnknownRound(round_number))?;
        if !self.state.rounds[idx].locked {
            return Err(GameError::RoundNotLocked(round_number));
        }
        let round = Arc::make_mut(&mut self.state.rounds[idx]);
        round.manual_reveal = !round.manual_reveal;
        Ok(round.manual_reveal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::visibility;
    use pretty_assertions::assert_eq;

    fn started(detectives: u8) -> GameEngine {
        let mut engine = GameEngine::new();
        engine.start(detectives, "1234").unwrap();
        engine
    }

    fn play(engine: &mut GameEngine, location: u16, mode: TransportMode) -> TurnAdvance {
        engine.submit_location(location).unwrap();
        engine.select_transport(mode, false).unwrap()
    }

    /// Mr. X at `mrx`, detectives at 100 + n.
    fn play_round(engine: &mut GameEngine, mrx: u16) {
        play(engine, mrx, TransportMode::Taxi);
        for n in 1..=engine.state().detective_count() as u16 {
            play(engine, 100 + n, TransportMode::Taxi);
        }
    }

    #[test]
    fn test_start_builds_roles_and_rounds() {
        for count in [3u8, 4, 5] {
            let engine = started(count);
            let state = engine.state();
            assert_eq!(state.status, GameStatus::Playing);
            assert_eq!(state.roles.len(), usize::from(count) + 1);
            assert_eq!(state.roles[0], Role::MrX);
            assert_eq!(state.rounds.len(), usize::from(TOTAL_ROUNDS));
            assert!(state.rounds.iter().all(|r| r.is_empty() && !r.locked));
            assert_eq!(state.current_round, 1);
            assert_eq!(state.current_player_index, 0);
            assert_eq!(engine.current_role(), Some(Role::MrX));
        }
    }

    #[test]
    fn test_start_rejects_bad_input() {
        let mut engine = GameEngine::new();
        assert_eq!(engine.start(1, "x"), Err(GameError::InvalidDetectiveCount(1)));
        assert_eq!(engine.start(6, "x"), Err(GameError::InvalidDetectiveCount(6)));
        assert_eq!(engine.start(3, ""), Err(GameError::EmptySecret));
        engine.start(3, "x").unwrap();
        assert_eq!(engine.start(3, "x"), Err(GameError::GameInProgress));
    }

    #[test]
    fn test_submit_location_validation() {
        let mut engine = started(3);
        assert_eq!(engine.submit_location(0), Err(GameError::InvalidLocation(0)));
        assert_eq!(
            engine.submit_location(201),
            Err(GameError::InvalidLocation(201))
        );
        assert_eq!(engine.pending_location(), None);

        play(&mut engine, 50, TransportMode::Taxi);
        play(&mut engine, 60, TransportMode::Taxi);

        // d2 cannot join d1, but may stand on Mr. X
        assert_eq!(
            engine.submit_location(60),
            Err(GameError::LocationOccupied {
                location: 60,
                by: Role::Detective(1)
            })
        );
        engine.submit_location(50).unwrap();
        assert_eq!(engine.pending_location(), Some(50));
    }

    #[test]
    fn test_collision_with_carried_over_location() {
        let mut engine = started(3);
        play_round(&mut engine, 50);
        engine.lock_round().unwrap();

        play(&mut engine, 51, TransportMode::Taxi);
        // d3 has not moved yet this round and still stands on 103
        assert_eq!(
            engine.submit_location(103),
            Err(GameError::LocationOccupied {
                location: 103,
                by: Role::Detective(3)
            })
        );
    }

    #[test]
    fn test_select_transport_requires_pending() {
        let mut engine = started(3);
        assert_eq!(
            engine.select_transport(TransportMode::Taxi, false),
            Err(GameError::NoPendingLocation)
        );
    }

    #[test]
    fn test_ticket_flow_detective_and_mr_x() {
        let mut engine = started(3);
        let bank_bus = engine.state().tickets.bank().bus;
        let mrx_bus = engine.state().tickets.inventory(Role::MrX).unwrap().bus;

        play(&mut engine, 50, TransportMode::Bus);
        let tickets = &engine.state().tickets;
        assert_eq!(tickets.inventory(Role::MrX).unwrap().bus, mrx_bus - 1);
        assert_eq!(tickets.bank().bus, bank_bus + 1);

        let d1_bus = tickets.inventory(Role::Detective(1)).unwrap().bus;
        let mrx_bus = tickets.inventory(Role::MrX).unwrap().bus;
        let advance = play(&mut engine, 60, TransportMode::Bus);
        assert_eq!(advance, TurnAdvance::Next(Role::Detective(2)));

        let tickets = &engine.state().tickets;
        assert_eq!(tickets.inventory(Role::Detective(1)).unwrap().bus, d1_bus - 1);
        assert_eq!(tickets.inventory(Role::MrX).unwrap().bus, mrx_bus + 1);
    }

    #[test]
    fn test_insufficient_tickets_leaves_state() {
        let mut engine = started(3);
        play(&mut engine, 50, TransportMode::Taxi);
        engine.submit_location(60).unwrap();
        let before = engine.state().clone();

        let err = engine.select_transport(TransportMode::Black, false).unwrap_err();
        assert!(matches!(err, GameError::Tickets(TicketError::InsufficientTickets { .. })));
        assert_eq!(engine.state(), &before);
        assert_eq!(engine.pending_location(), Some(60));
    }

    #[test]
    fn test_turn_wraps_within_round() {
        let mut engine = started(2);
        play(&mut engine, 50, TransportMode::Taxi);
        play(&mut engine, 60, TransportMode::Taxi);
        let advance = play(&mut engine, 70, TransportMode::Taxi);

        assert_eq!(advance, TurnAdvance::RoundComplete);
        assert_eq!(engine.state().current_player_index, 0);
        assert_eq!(engine.state().current_round, 1);
        assert!(engine.state().is_round_complete());
        assert_eq!(engine.current_role(), None);
        assert_eq!(engine.submit_location(80), Err(GameError::RoundComplete));
    }

    #[test]
    fn test_double_move() {
        let mut engine = started(3);
        engine.submit_location(50).unwrap();
        let advance = engine.select_transport(TransportMode::Taxi, true).unwrap();
        assert_eq!(advance, TurnAdvance::SecondLeg(Role::MrX));
        assert_eq!(engine.current_role(), Some(Role::MrX));
        assert_eq!(engine.state().tickets.inventory(Role::MrX).unwrap().double_move, 1);
        assert_eq!(engine.state().tickets.bank().double_move, 1);

        engine.submit_location(70).unwrap();
        let advance = engine.select_transport(TransportMode::Black, true).unwrap();
        assert_eq!(advance, TurnAdvance::Next(Role::Detective(1)));

        let entry = engine.state().round(1).unwrap().entry(Role::MrX).unwrap().clone();
        assert_eq!(entry.location, Some(50));
        assert_eq!(entry.second_location, Some(70));
        assert_eq!(entry.effective_location(), Some(70));
        // intent on the second leg is ignored
        assert_eq!(engine.state().tickets.inventory(Role::MrX).unwrap().double_move, 1);
    }

    #[test]
    fn test_double_move_intent_for_detective_is_ignored() {
        let mut engine = started(3);
        play(&mut engine, 50, TransportMode::Taxi);
        engine.submit_location(60).unwrap();
        let advance = engine.select_transport(TransportMode::Taxi, true).unwrap();
        assert_eq!(advance, TurnAdvance::Next(Role::Detective(2)));
        let entry = engine.state().round(1).unwrap().entry(Role::Detective(1)).unwrap().clone();
        assert!(!entry.double_move);
    }

    #[test]
    fn test_undo_restores_tickets() {
        let mut engine = started(3);
        let before = engine.state().tickets.clone();

        engine.submit_location(50).unwrap();
        engine.select_transport(TransportMode::Bus, true).unwrap();
        engine.submit_location(51).unwrap();
        engine.select_transport(TransportMode::Underground, false).unwrap();
        play(&mut engine, 60, TransportMode::Taxi);

        let next = engine.undo_move(Role::MrX).unwrap();
        assert_eq!(next, Role::MrX);
        assert_eq!(engine.state().tickets, before);
        assert!(engine.state().round(1).unwrap().is_empty());
        assert_eq!(engine.state().current_player_index, 0);
        assert!(!engine.state().awaiting_second_leg);
    }

    #[test]
    fn test_undo_detective_rewinds_turn() {
        let mut engine = started(3);
        play(&mut engine, 50, TransportMode::Taxi);
        let after_mrx = engine.state().tickets.clone();
        play(&mut engine, 60, TransportMode::Bus);
        play(&mut engine, 70, TransportMode::Underground);

        assert_eq!(engine.undo_move(Role::Detective(1)).unwrap(), Role::Detective(1));
        assert_eq!(engine.state().tickets, after_mrx);
        assert_eq!(engine.current_role(), Some(Role::Detective(1)));
        let round = engine.state().round(1).unwrap();
        assert!(round.entry(Role::MrX).unwrap().is_committed());
        assert!(!round.entry(Role::Detective(2)).unwrap().is_touched());

        assert_eq!(
            engine.undo_move(Role::Detective(3)),
            Err(GameError::NothingToUndo(Role::Detective(3)))
        );
    }

    #[test]
    fn test_lock_requires_complete_round() {
        let mut engine = started(3);
        play(&mut engine, 50, TransportMode::Taxi);
        assert_eq!(engine.lock_round(), Err(GameError::RoundIncomplete(1)));
    }

    #[test]
    fn test_lock_advances_round() {
        let mut engine = started(3);
        play_round(&mut engine, 50);
        let outcome = engine.lock_round().unwrap();

        assert_eq!(outcome, RoundOutcome::Continue { next_round: 2 });
        assert!(engine.state().round(1).unwrap().locked);
        assert_eq!(engine.state().current_round, 2);
        assert_eq!(engine.current_role(), Some(Role::MrX));
        assert_eq!(
            engine.undo_move(Role::MrX),
            Err(GameError::NothingToUndo(Role::MrX))
        );
    }

    #[test]
    fn test_capture() {
        let mut engine = started(3);
        play(&mut engine, 50, TransportMode::Taxi);
        play(&mut engine, 60, TransportMode::Taxi);
        play(&mut engine, 50, TransportMode::Taxi);
        play(&mut engine, 70, TransportMode::Taxi);

        let replay = engine.clone();
        let outcome = engine.lock_round().unwrap();
        assert_eq!(
            outcome,
            RoundOutcome::DetectivesWin {
                captor: Role::Detective(2),
                round: 1
            }
        );
        assert_eq!(engine.state().status, GameStatus::DetectivesWin);
        assert_eq!(engine.state().caught_by, Some(Role::Detective(2)));
        assert_eq!(engine.state().caught_in_round, Some(1));

        let mut again = replay;
        assert_eq!(again.lock_round().unwrap(), outcome);
    }

    #[test]
    fn test_capture_uses_second_leg() {
        let mut engine = started(2);
        engine.submit_location(60).unwrap();
        engine.select_transport(TransportMode::Taxi, true).unwrap();
        engine.submit_location(80).unwrap();
        engine.select_transport(TransportMode::Taxi, false).unwrap();
        // d1 lands on the first leg only: no capture
        play(&mut engine, 60, TransportMode::Taxi);
        play(&mut engine, 90, TransportMode::Taxi);
        assert_eq!(
            engine.lock_round().unwrap(),
            RoundOutcome::Continue { next_round: 2 }
        );
    }

    #[test]
    fn test_mr_x_survives_final_round() {
        let mut engine = started(3);
        let mut state = engine.state().clone();
        state.current_round = TOTAL_ROUNDS;
        engine = GameEngine::from_state(state);

        play_round(&mut engine, 50);
        assert_eq!(
            engine.lock_round().unwrap(),
            RoundOutcome::MrXWins { round: TOTAL_ROUNDS }
        );
        assert_eq!(engine.state().status, GameStatus::MrXWins);
        assert_eq!(engine.lock_round(), Err(GameError::NotPlaying));
    }

    #[test]
    fn test_detectives_exhausted_mid_game() {
        let mut engine = started(3);
        let mut last = None;
        for round in 1..=22u8 {
            let mrx_mode = engine.state().tickets.available_transports(Role::MrX)[0];
            play(&mut engine, 10 + u16::from(round % 2), mrx_mode);
            for n in 1..=3u8 {
                let mode = engine.state().tickets.available_transports(Role::Detective(n))[0];
                play(&mut engine, 100 + u16::from(n) * 10 + u16::from(round % 2), mode);
            }
            last = Some(engine.lock_round().unwrap());
        }
        assert_eq!(last, Some(RoundOutcome::MrXWins { round: 22 }));
        assert_eq!(engine.state().status, GameStatus::MrXWins);
        assert!(engine.state().current_round < TOTAL_ROUNDS);
    }

    #[test]
    fn test_manual_reveal_toggle() {
        let mut engine = started(3);
        assert_eq!(engine.toggle_manual_reveal(1), Err(GameError::RoundNotLocked(1)));
        assert_eq!(engine.toggle_manual_reveal(0), Err(GameError::UnknownRound(0)));
        assert_eq!(engine.toggle_manual_reveal(25), Err(GameError::UnknownRound(25)));

        play_round(&mut engine, 50);
        engine.lock_round().unwrap();
        assert_eq!(engine.toggle_manual_reveal(1), Ok(true));
        assert_eq!(engine.toggle_manual_reveal(1), Ok(false));
        assert_eq!(engine.state().status, GameStatus::Playing);
    }

    #[test]
    fn test_hidden_location_surfaces_on_reveal_round() {
        let mut engine = started(3);
        play_round(&mut engine, 50);
        engine.lock_round().unwrap();

        let round1 = engine.state().round(1).unwrap();
        let v = visibility::for_round(round1, Role::MrX, false);
        assert!(!v.show_location);
        assert!(v.show_transport);

        play_round(&mut engine, 51);
        engine.lock_round().unwrap();
        play_round(&mut engine, 50);
        engine.lock_round().unwrap();

        let round3 = engine.state().round(3).unwrap();
        assert_eq!(round3.entry(Role::MrX).unwrap().location, Some(50));
        assert!(visibility::for_round(round3, Role::MrX, false).show_location);
    }

    #[test]
    fn test_clone_shares_untouched_rounds() {
        let mut engine = started(3);
        let snapshot = engine.state().clone();
        play(&mut engine, 50, TransportMode::Taxi);

        assert!(!Arc::ptr_eq(&engine.state().rounds[0], &snapshot.rounds[0]));
        assert!(Arc::ptr_eq(&engine.state().rounds[1], &snapshot.rounds[1]));
    }

    #[test]
    fn test_state_serde_round_trip() {
        let mut engine = started(4);
        engine.submit_location(50).unwrap();
        engine.select_transport(TransportMode::Black, true).unwrap();

        let json = serde_json::to_string(engine.state()).unwrap();
        let back: GameState = serde_json::from_str(&json).unwrap();
        assert_eq!(&back, engine.state());

        let resumed = GameEngine::from_state(back);
        assert_eq!(resumed.current_role(), Some(Role::MrX));
        assert!(resumed.state().awaiting_second_leg);
    }

    #[test]
    fn test_secret() {
        let engine = started(3);
        assert!(engine.verify_secret("1234"));
        assert!(!engine.verify_secret("0000"));
        assert_eq!(engine.state().without_secret().secret, None);
    }
}
