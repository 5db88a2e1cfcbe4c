//! Ticket economy.
//!
//! Each role holds a [`TicketInventory`]; the [`TicketEconomy`] owns all of them
//! plus the bank and applies the transfer rules:
//!
//! - a detective's spent ticket (other than the untraceable one) goes to Mr. X
//! - Mr. X's spent tickets go to the bank and leave circulation
//! - the double-move ticket is Mr. X only and also goes to the bank
//!
//! Tickets are never created or destroyed after the game starts, so for every
//! transport type the sum over all roles and the bank is constant.
//!
//! Inventories are stored behind `Arc` so cloning the economy (for projections
//! and persistence snapshots) shares every inventory a move did not touch.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::role::Role;

/// Transport modes a move can be made with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Taxi,
    Bus,
    Underground,
    /// Untraceable ticket, Mr. X only
    Black,
}

impl TransportMode {
    pub const ALL: [TransportMode; 4] = [Self::Taxi, Self::Bus, Self::Underground, Self::Black];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Taxi => "taxi",
            Self::Bus => "bus",
            Self::Underground => "underground",
            Self::Black => "black",
        }
    }

    /// Whether using this ticket conceals the transport on hidden rounds.
    pub fn is_untraceable(&self) -> bool {
        matches!(self, Self::Black)
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ticket counters for one holder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketInventory {
    pub taxi: u32,
    pub bus: u32,
    pub underground: u32,
    pub black: u32,
    pub double_move: u32,
}

impl TicketInventory {
    /// Starting hand for a detective.
    pub fn detective() -> Self {
        Self {
            taxi: 10,
            bus: 8,
            underground: 4,
            black: 0,
            double_move: 0,
        }
    }

    /// Starting hand for Mr. X.
    pub fn mr_x() -> Self {
        Self {
            taxi: 4,
            bus: 3,
            underground: 3,
            black: 5,
            double_move: 2,
        }
    }

    /// Starting hand for a role.
    pub fn initial_for(role: Role) -> Self {
        if role.is_mr_x() {
            Self::mr_x()
        } else {
            Self::detective()
        }
    }

    pub fn get(&self, mode: TransportMode) -> u32 {
        match mode {
            TransportMode::Taxi => self.taxi,
            TransportMode::Bus => self.bus,
            TransportMode::Underground => self.underground,
            TransportMode::Black => self.black,
        }
    }

    fn get_mut(&mut self, mode: TransportMode) -> &mut u32 {
        match mode {
            TransportMode::Taxi => &mut self.taxi,
            TransportMode::Bus => &mut self.bus,
            TransportMode::Underground => &mut self.underground,
            TransportMode::Black => &mut self.black,
        }
    }

    /// Taxi + bus + underground.
    pub fn ordinary_total(&self) -> u32 {
        self.taxi + self.bus + self.underground
    }
}

/// Where the ticket from a spend ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Credit {
    MrX,
    Bank,
    Nowhere,
}

fn credit_for(role: Role, mode: TransportMode) -> Credit {
    match role {
        Role::MrX => Credit::Bank,
        Role::Detective(_) if mode.is_untraceable() => Credit::Nowhere,
        Role::Detective(_) => Credit::MrX,
    }
}

/// Ticket errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TicketError {
    #[error("{role} has no {ticket} tickets left")]
    InsufficientTickets { role: Role, ticket: &'static str },

    #[error("no ticket inventory for {0}")]
    UnknownRole(Role),

    #[error("only Mr. X can use double-move tickets")]
    NotMrX,

    #[error("cannot refund {ticket} for {role}: credited ticket already spent")]
    RefundUnavailable { role: Role, ticket: &'static str },
}

/// All inventories in a game plus the bank.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketEconomy {
    players: BTreeMap<Role, Arc<TicketInventory>>,
    bank: Arc<TicketInventory>,
}

impl TicketEconomy {
    /// Allocate starting hands for every role; the bank starts empty.
    pub fn new(roles: &[Role]) -> Self {
        Self {
            players: roles
                .iter()
                .map(|r| (*r, Arc::new(TicketInventory::initial_for(*r))))
                .collect(),
            bank: Arc::new(TicketInventory::default()),
        }
    }

    pub fn inventory(&self, role: Role) -> Option<&TicketInventory> {
        self.players.get(&role).map(|inv| inv.as_ref())
    }

    pub fn bank(&self) -> &TicketInventory {
        &self.bank
    }

    /// Iterate inventories in role order.
    pub fn inventories(&self) -> impl Iterator<Item = (Role, &TicketInventory)> {
        self.players.iter().map(|(r, inv)| (*r, inv.as_ref()))
    }

    /// Blank `role`'s hand and the bank in this copy.
    pub fn withhold(&mut self, role: Role) {
        if let Some(inv) = self.players.get_mut(&role) {
            *inv = Arc::new(TicketInventory::default());
        }
        self.bank = Arc::new(TicketInventory::default());
    }

    fn inventory_mut(&mut self, role: Role) -> Result<&mut TicketInventory, TicketError> {
        self.players
            .get_mut(&role)
            .map(Arc::make_mut)
            .ok_or(TicketError::UnknownRole(role))
    }

    /// Take one ticket from a role.
    pub fn spend(&mut self, role: Role, mode: TransportMode) -> Result<(), TicketError> {
        let counter = self.inventory_mut(role)?.get_mut(mode);
        if *counter == 0 {
            return Err(TicketError::InsufficientTickets {
                role,
                ticket: mode.as_str(),
            });
        }
        *counter -= 1;
        Ok(())
    }

    /// Hand a just-spent ticket to its destination.
    pub fn settle(&mut self, role: Role, mode: TransportMode) -> Result<(), TicketError> {
        match credit_for(role, mode) {
            Credit::MrX => *self.inventory_mut(Role::MrX)?.get_mut(mode) += 1,
            Credit::Bank => *Arc::make_mut(&mut self.bank).get_mut(mode) += 1,
            Credit::Nowhere => {}
        }
        Ok(())
    }

    /// Spend and settle as one step; nothing changes on failure.
    pub fn charge(&mut self, role: Role, mode: TransportMode) -> Result<(), TicketError> {
        if credit_for(role, mode) == Credit::MrX && !self.players.contains_key(&Role::MrX) {
            return Err(TicketError::UnknownRole(Role::MrX));
        }
        self.spend(role, mode)?;
        self.settle(role, mode)
    }

    /// Reverse a [`charge`](Self::charge). Checked before anything is mutated.
    pub fn refund(&mut self, role: Role, mode: TransportMode) -> Result<(), TicketError> {
        if !self.players.contains_key(&role) {
            return Err(TicketError::UnknownRole(role));
        }
        let unavailable = TicketError::RefundUnavailable {
            role,
            ticket: mode.as_str(),
        };
        let credit = credit_for(role, mode);
        match credit {
            Credit::MrX => {
                let held = self
                    .inventory(Role::MrX)
                    .ok_or(TicketError::UnknownRole(Role::MrX))?
                    .get(mode);
                if held == 0 {
                    return Err(unavailable);
                }
                *self.inventory_mut(Role::MrX)?.get_mut(mode) -= 1;
            }
            Credit::Bank => {
                if self.bank.get(mode) == 0 {
                    return Err(unavailable);
                }
                *Arc::make_mut(&mut self.bank).get_mut(mode) -= 1;
            }
            Credit::Nowhere => {}
        }
        *self.inventory_mut(role)?.get_mut(mode) += 1;
        Ok(())
    }

    /// Move Mr. X's double-move ticket to the bank.
    pub fn spend_double_move(&mut self, role: Role) -> Result<(), TicketError> {
        if !role.is_mr_x() {
            return Err(TicketError::NotMrX);
        }
        let inv = self.inventory_mut(role)?;
        if inv.double_move == 0 {
            return Err(TicketError::InsufficientTickets {
                role,
                ticket: "double_move",
            });
        }
        inv.double_move -= 1;
        Arc::make_mut(&mut self.bank).double_move += 1;
        Ok(())
    }

    /// Return a double-move ticket from the bank (undo only).
    pub fn refund_double_move(&mut self, role: Role) -> Result<(), TicketError> {
        if !role.is_mr_x() {
            return Err(TicketError::NotMrX);
        }
        if self.bank.double_move == 0 {
            return Err(TicketError::RefundUnavailable {
                role,
                ticket: "double_move",
            });
        }
        self.inventory_mut(role)?.double_move += 1;
        Arc::make_mut(&mut self.bank).double_move -= 1;
        Ok(())
    }

    /// No taxi, bus or underground tickets left.
    pub fn exhausted(&self, role: Role) -> bool {
        self.inventory(role)
            .map(|inv| inv.ordinary_total() == 0)
            .unwrap_or(true)
    }

    pub fn has_double_move(&self, role: Role) -> bool {
        role.is_mr_x() && self.inventory(role).is_some_and(|inv| inv.double_move > 0)
    }

    /// Transport types the role can currently pay for.
    pub fn available_transports(&self, role: Role) -> Vec<TransportMode> {
        let Some(inv) = self.inventory(role) else {
            return Vec::new();
        };
        TransportMode::ALL
            .into_iter()
            .filter(|mode| inv.get(*mode) > 0)
            .collect()
    }

    /// Tickets of a type in circulation, bank included.
    pub fn total(&self, mode: TransportMode) -> u32 {
        self.players.values().map(|inv| inv.get(mode)).sum::<u32>() + self.bank.get(mode)
    }

    /// Double-move tickets held by anyone, bank included.
    pub fn total_double_moves(&self) -> u32 {
        self.players.values().map(|inv| inv.double_move).sum::<u32>() + self.bank.double_move
    }
}
