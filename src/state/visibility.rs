//! What may be shown of Mr. X's moves.
//!
//! [`visible`] is the only rule for hiding Mr. X: the replication projection and
//! every round display go through it. Detective entries are always shown in full.

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::game::{PlayerEntry, RoundData};
use super::role::Role;

/// Rounds on which Mr. X must surface.
pub const REVEAL_ROUNDS: [u8; 5] = [3, 8, 13, 18, 24];

pub fn is_reveal_round(round: u8) -> bool {
    REVEAL_ROUNDS.contains(&round)
}

/// First reveal round strictly after `round`.
pub fn next_reveal_round(round: u8) -> Option<u8> {
    REVEAL_ROUNDS.iter().copied().find(|r| *r > round)
}

/// Which parts of an entry may be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visibility {
    pub show_location: bool,
    pub show_transport: bool,
}

impl Visibility {
    pub const FULL: Visibility = Visibility {
        show_location: true,
        show_transport: true,
    };

    pub const HIDDEN: Visibility = Visibility {
        show_location: false,
        show_transport: false,
    };
}

/// Decide visibility of Mr. X's entry for one round.
///
/// The decision is taken from the first leg and covers the second leg of a
/// double move as well.
pub fn visible(
    round_number: u8,
    entry: &PlayerEntry,
    is_reveal_round: bool,
    manual_reveal: bool,
    game_over: bool,
) -> Visibility {
    let decision = if is_reveal_round || manual_reveal || game_over {
        Visibility::FULL
    } else if entry.transport.is_some_and(|t| t.is_untraceable()) {
        Visibility::HIDDEN
    } else {
        Visibility {
            show_location: false,
            show_transport: true,
        }
    };
    trace!(round = round_number, ?decision, "mr x visibility");
    decision
}

/// Visibility of a role's entry in a round.
pub fn for_round(round: &RoundData, role: Role, game_over: bool) -> Visibility {
    if !role.is_mr_x() {
        return Visibility::FULL;
    }
    match round.entry(role) {
        Some(entry) => visible(
            round.round_number,
            entry,
            is_reveal_round(round.round_number),
            round.manual_reveal,
            game_over,
        ),
        None => Visibility::FULL,
    }
}

/// Copy of `entry` with the hidden fields cleared.
pub fn redact(entry: &PlayerEntry, visibility: Visibility) -> PlayerEntry {
    let mut out = entry.clone();
    if !visibility.show_location {
        out.location = None;
        out.second_location = None;
    }
    if !visibility.show_transport {
        out.transport = None;
        out.second_transport = None;
    }
    out
}

/// A round as a detective may see it, in role order.
pub fn round_view(round: &RoundData, game_over: bool) -> Vec<(Role, PlayerEntry)> {
    round
        .entries
        .iter()
        .map(|(role, entry)| (*role, redact(entry, for_round(round, *role, game_over))))
        .collect()
}
