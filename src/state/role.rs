//! Role identifiers.
//!
//! Every seat in a game is a [`Role`]: the hidden player (`mrx`) or one of the
//! numbered detectives (`d1`, `d2`, ...). Roles order the hidden player first and
//! detectives by number, which is the turn order within a round.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A seat in the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    /// The hidden player
    MrX,
    /// A seeker, numbered from 1
    Detective(u8),
}

impl Role {
    /// Build the turn-ordered role list for a game.
    pub fn roster(detective_count: u8) -> Vec<Role> {
        std::iter::once(Role::MrX)
            .chain((1..=detective_count).map(Role::Detective))
            .collect()
    }

    pub fn is_mr_x(&self) -> bool {
        matches!(self, Self::MrX)
    }

    pub fn is_detective(&self) -> bool {
        matches!(self, Self::Detective(_))
    }

    /// Short wire identifier (`mrx`, `d1`, ...).
    pub fn id(&self) -> String {
        match self {
            Self::MrX => "mrx".to_string(),
            Self::Detective(n) => format!("d{}", n),
        }
    }

    /// Human-readable name.
    pub fn display_name(&self) -> String {
        match self {
            Self::MrX => "Mr. X".to_string(),
            Self::Detective(n) => format!("Detective {}", n),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Error parsing a role identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role identifier: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "mrx" {
            return Ok(Self::MrX);
        }
        s.strip_prefix('d')
            .and_then(|n| n.parse::<u8>().ok())
            .filter(|n| *n > 0)
            .map(Self::Detective)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

impl TryFrom<String> for Role {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.id()
    }
}
