//! Per-peer view of the authoritative game state.

use std::sync::Arc;

use crate::state::visibility::{self, Visibility};
use crate::state::{GameState, Role};

/// The state as `viewer` may see it.
///
/// The secret is always stripped. Mr. X sees his own moves; everyone else gets
/// his entries redacted round by round, and sees neither his hand nor the bank
/// until the game ends, since their counters would give away a hidden ticket.
/// Rounds needing no redaction stay shared with the host's copy.
pub fn project(state: &GameState, viewer: Option<Role>) -> GameState {
    let mut view = state.without_secret();
    if viewer == Some(Role::MrX) {
        return view;
    }

    let game_over = state.is_over();
    if !game_over {
        view.tickets.withhold(Role::MrX);
    }
    for round in view.rounds.iter_mut() {
        let Some(entry) = round.entry(Role::MrX) else {
            continue;
        };
        let decision = visibility::for_round(round, Role::MrX, game_over);
        if decision == Visibility::FULL {
            continue;
        }
        let redacted = visibility::redact(entry, decision);
        if &redacted != entry {
            Arc::make_mut(round).entries.insert(Role::MrX, redacted);
        }
    }
    view
}
