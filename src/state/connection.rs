//! Peer link tracking.
//!
//! Host-side table of the links opened by joining participants: status,
//! activity, outbound sequence numbers and the role each peer plays once the
//! hunt starts. Disconnected peers are never resumed; their moves simply stop
//! arriving.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::role::Role;

/// Link state for a single peer.
#[derive(Debug, Clone)]
pub struct PeerLink {
    /// Link id assigned by the transport
    pub peer_id: String,

    /// Display name from the join request
    pub name: String,

    /// Current link status
    pub status: LinkStatus,

    /// Role assigned at game start
    pub role: Option<Role>,

    /// When this link was opened
    pub connected_at: Instant,

    /// Last inbound message
    pub last_activity: Instant,

    /// Sequence number of the last outbound message
    pub send_seq: u64,
}

/// Link status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    /// Open and accepting messages
    Connected,

    /// Closed by the peer or the transport
    Disconnected { since: Instant },

    /// Removed by the host
    Kicked { reason: String },
}

impl LinkStatus {
    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl PeerLink {
    pub fn new(peer_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            peer_id: peer_id.into(),
            name: name.into(),
            status: LinkStatus::Connected,
            role: None,
            connected_at: now,
            last_activity: now,
            send_seq: 0,
        }
    }

    /// Record activity (any message received).
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Get next outbound sequence number.
    pub fn next_seq(&mut self) -> u64 {
        self.send_seq += 1;
        self.send_seq
    }

    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

/// Registry of peer links, indexed by link id and by role.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    links: HashMap<String, PeerLink>,

    /// Role to peer id, filled at game start
    roles: HashMap<Role, String>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new link.
    pub fn add(&mut self, link: PeerLink) {
        self.links.insert(link.peer_id.clone(), link);
    }

    pub fn get(&self, peer_id: &str) -> Option<&PeerLink> {
        self.links.get(peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &str) -> Option<&mut PeerLink> {
        self.links.get_mut(peer_id)
    }

    /// Remove a link and release its role.
    pub fn remove(&mut self, peer_id: &str) -> Option<PeerLink> {
        let link = self.links.remove(peer_id)?;
        if let Some(role) = link.role {
            self.roles.remove(&role);
        }
        Some(link)
    }

    /// Mark a link as disconnected. Its role stays assigned but orphaned.
    pub fn disconnect(&mut self, peer_id: &str) {
        if let Some(link) = self.links.get_mut(peer_id) {
            link.status = LinkStatus::Disconnected {
                since: Instant::now(),
            };
        }
    }

    /// Mark a link as kicked and release its role.
    pub fn kick(&mut self, peer_id: &str, reason: &str) -> Option<PeerLink> {
        let mut link = self.remove(peer_id)?;
        link.status = LinkStatus::Kicked {
            reason: reason.to_string(),
        };
        Some(link)
    }

    pub fn touch(&mut self, peer_id: &str) {
        if let Some(link) = self.links.get_mut(peer_id) {
            link.touch();
        }
    }

    /// Bind a role to a peer, replacing any previous holder.
    pub fn assign_role(&mut self, peer_id: &str, role: Role) -> bool {
        let Some(link) = self.links.get_mut(peer_id) else {
            return false;
        };
        if let Some(old) = link.role.replace(role) {
            self.roles.remove(&old);
        }
        if let Some(previous) = self.roles.insert(role, peer_id.to_string()) {
            if previous != peer_id {
                if let Some(other) = self.links.get_mut(&previous) {
                    other.role = None;
                }
            }
        }
        true
    }

    pub fn clear_roles(&mut self) {
        self.roles.clear();
        for link in self.links.values_mut() {
            link.role = None;
        }
    }

    pub fn role_of(&self, peer_id: &str) -> Option<Role> {
        self.links.get(peer_id).and_then(|l| l.role)
    }

    /// Peer holding a role, connected or not.
    pub fn peer_for_role(&self, role: Role) -> Option<&PeerLink> {
        self.roles.get(&role).and_then(|id| self.links.get(id))
    }

    /// Role is held by a connected peer.
    pub fn is_role_connected(&self, role: Role) -> bool {
        self.peer_for_role(role)
            .is_some_and(|l| l.status.is_connected())
    }

    /// Get all connected peer ids.
    pub fn connected_peers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .links
            .iter()
            .filter(|(_, l)| l.status.is_connected())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Count connected peers.
    pub fn connected_count(&self) -> usize {
        self.links
            .values()
            .filter(|l| l.status.is_connected())
            .count()
    }

    /// Count total tracked peers.
    pub fn total_count(&self) -> usize {
        self.links.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_new() {
        let link = PeerLink::new("p1", "Ann");
        assert!(link.status.is_connected());
        assert_eq!(link.send_seq, 0);
        assert_eq!(link.role, None);
    }

    #[test]
    fn test_sequence_numbers() {
        let mut link = PeerLink::new("p1", "Ann");
        assert_eq!(link.next_seq(), 1);
        assert_eq!(link.next_seq(), 2);
        assert_eq!(link.send_seq, 2);
    }

    #[test]
    fn test_registry_basic() {
        let mut registry = PeerRegistry::new();
        registry.add(PeerLink::new("p1", "Ann"));
        registry.add(PeerLink::new("p2", "Bo"));

        assert_eq!(registry.connected_count(), 2);
        assert!(registry.get("p1").is_some());
        assert!(registry.get("p3").is_none());
        assert_eq!(registry.connected_peers(), vec!["p1", "p2"]);
    }

    #[test]
    fn test_disconnect_keeps_role() {
        let mut registry = PeerRegistry::new();
        registry.add(PeerLink::new("p1", "Ann"));
        assert!(registry.assign_role("p1", Role::Detective(1)));

        registry.disconnect("p1");
        assert_eq!(registry.connected_count(), 0);
        assert_eq!(registry.total_count(), 1);
        assert_eq!(registry.role_of("p1"), Some(Role::Detective(1)));
        assert!(!registry.is_role_connected(Role::Detective(1)));
    }

    #[test]
    fn test_kick_releases_role() {
        let mut registry = PeerRegistry::new();
        registry.add(PeerLink::new("p1", "Ann"));
        registry.assign_role("p1", Role::MrX);

        let kicked = registry.kick("p1", "bye").unwrap();
        assert_eq!(
            kicked.status,
            LinkStatus::Kicked {
                reason: "bye".to_string()
            }
        );
        assert!(registry.peer_for_role(Role::MrX).is_none());
        assert!(registry.get("p1").is_none());
    }

    #[test]
    fn test_role_reassignment() {
        let mut registry = PeerRegistry::new();
        registry.add(PeerLink::new("p1", "Ann"));
        registry.add(PeerLink::new("p2", "Bo"));
        registry.assign_role("p1", Role::Detective(1));
        registry.assign_role("p2", Role::Detective(1));

        assert_eq!(registry.role_of("p1"), None);
        assert_eq!(
            registry.peer_for_role(Role::Detective(1)).map(|l| l.peer_id.as_str()),
            Some("p2")
        );
        assert!(!registry.assign_role("p9", Role::MrX));

        registry.clear_roles();
        assert_eq!(registry.role_of("p2"), None);
    }
}
