//! Lobby state management.
//!
//! Gathers the participants of an online session, elects the hidden player by
//! vote, collects their secret and hands a role assignment to the engine.
//!
//! ```text
//! waiting ──begin_voting──▶ voting ──tally──▶ pin-setup ──set_secret──▶ ready-to-start
//!    ▲                                                                      │
//!    └──────────── participant removed / reset ◀────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::role::Role;

/// Maximum participants per lobby.
pub const MAX_PARTICIPANTS: usize = 6;

/// Participants needed before voting can begin.
pub const MIN_PARTICIPANTS: usize = 3;

/// Lobby phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LobbyPhase {
    #[default]
    Waiting,
    Voting,
    PinSetup,
    ReadyToStart,
}

impl LobbyPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Voting => "voting",
            Self::PinSetup => "pin-setup",
            Self::ReadyToStart => "ready-to-start",
        }
    }
}

impl std::fmt::Display for LobbyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A participant's state within a lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Link id assigned by the transport
    pub id: String,

    /// Display name
    pub name: String,

    /// Avatar id chosen by the participant
    pub avatar: u32,

    /// Whether participant is ready to vote
    pub is_ready: bool,

    /// Whether participant is currently connected
    pub is_connected: bool,

    /// Candidate this participant voted for
    pub voted_for: Option<String>,

    /// Session owner (the host)
    pub is_owner: bool,

    /// When participant joined this lobby
    pub joined_at: chrono::DateTime<chrono::Utc>,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>, avatar: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            avatar,
            is_ready: false,
            is_connected: true,
            voted_for: None,
            is_owner: false,
            joined_at: chrono::Utc::now(),
        }
    }
}

/// What the lobby hands to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartParameters {
    pub detective_count: u8,
    pub secret: String,
    /// Participant id → role, hidden player first
    pub assignments: Vec<(String, Role)>,
}

impl StartParameters {
    pub fn role_of(&self, participant_id: &str) -> Option<Role> {
        self.assignments
            .iter()
            .find(|(id, _)| id == participant_id)
            .map(|(_, role)| *role)
    }
}

/// Lobby view sent to every participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbySnapshot {
    pub phase: LobbyPhase,
    pub participants: Vec<Participant>,
    pub elected: Option<String>,
    pub secret_set: bool,
}

/// Lobby errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LobbyError {
    #[error("Lobby is full")]
    Full,
    #[error("Already in the lobby")]
    AlreadyJoined,
    #[error("Not a participant: {0}")]
    NotParticipant(String),
    #[error("Only the session owner can do that")]
    NotOwner,
    #[error("Not allowed while the lobby is {0}")]
    WrongPhase(LobbyPhase),
    #[error("Need at least 3 participants, have {0}")]
    NotEnoughParticipants(usize),
    #[error("Not everyone is ready")]
    NotAllReady,
    #[error("No votes cast")]
    NoVotes,
    #[error("Only the elected player can set the secret")]
    NotElected,
    #[error("Secret must not be empty")]
    EmptySecret,
    #[error("The session owner cannot be removed")]
    CannotRemoveOwner,
}

/// Pre-game coordinator for one online session.
#[derive(Debug, Clone)]
pub struct LobbyCoordinator {
    phase: LobbyPhase,

    /// Join order is significant: tie-breaks and detective numbering follow it
    participants: Vec<Participant>,

    elected: Option<String>,

    secret: Option<String>,
}

impl LobbyCoordinator {
    /// Create a lobby with the owner as its first participant.
    pub fn new(owner_id: impl Into<String>, owner_name: impl Into<String>, avatar: u32) -> Self {
        let mut owner = Participant::new(owner_id, owner_name, avatar);
        owner.is_owner = true;
        Self {
            phase: LobbyPhase::Waiting,
            participants: vec![owner],
            elected: None,
            secret: None,
        }
    }

    pub fn phase(&self) -> LobbyPhase {
        self.phase
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    fn participant_mut(&mut self, id: &str) -> Result<&mut Participant, LobbyError> {
        self.participants
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| LobbyError::NotParticipant(id.to_string()))
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.participants
            .iter()
            .find(|p| p.is_owner)
            .map(|p| p.id.as_str())
    }

    pub fn is_owner(&self, id: &str) -> bool {
        self.participant(id).is_some_and(|p| p.is_owner)
    }

    pub fn elected(&self) -> Option<&str> {
        self.elected.as_deref()
    }

    pub fn secret_set(&self) -> bool {
        self.secret.is_some()
    }

    pub fn is_full(&self) -> bool {
        self.participants.len() >= MAX_PARTICIPANTS
    }

    /// Check if all participants are ready.
    pub fn all_ready(&self) -> bool {
        self.participants.iter().all(|p| p.is_ready)
    }

    fn require_phase(&self, phase: LobbyPhase) -> Result<(), LobbyError> {
        if self.phase != phase {
            return Err(LobbyError::WrongPhase(self.phase));
        }
        Ok(())
    }

    fn require_owner(&self, id: &str) -> Result<(), LobbyError> {
        if !self.is_owner(id) {
            return Err(LobbyError::NotOwner);
        }
        Ok(())
    }

    /// Add a participant.
    pub fn join(&mut self, id: &str, name: &str, avatar: u32) -> Result<(), LobbyError> {
        self.require_phase(LobbyPhase::Waiting)?;
        if self.participant(id).is_some() {
            return Err(LobbyError::AlreadyJoined);
        }
        if self.is_full() {
            return Err(LobbyError::Full);
        }
        self.participants.push(Participant::new(id, name, avatar));
        debug!(participant = id, name, count = self.participants.len(), "joined lobby");
        Ok(())
    }

    /// Set participant ready state.
    pub fn set_ready(&mut self, id: &str, ready: bool) -> Result<(), LobbyError> {
        self.require_phase(LobbyPhase::Waiting)?;
        self.participant_mut(id)?.is_ready = ready;
        Ok(())
    }

    /// Set participant connection state.
    pub fn set_connected(&mut self, id: &str, connected: bool) -> Result<(), LobbyError> {
        self.participant_mut(id)?.is_connected = connected;
        Ok(())
    }

    /// Owner opens the vote.
    pub fn begin_voting(&mut self, by: &str) -> Result<(), LobbyError> {
        self.require_owner(by)?;
        self.require_phase(LobbyPhase::Waiting)?;
        if self.participants.len() < MIN_PARTICIPANTS {
            return Err(LobbyError::NotEnoughParticipants(self.participants.len()));
        }
        if !self.all_ready() {
            return Err(LobbyError::NotAllReady);
        }
        for p in &mut self.participants {
            p.voted_for = None;
        }
        self.phase = LobbyPhase::Voting;
        info!(participants = self.participants.len(), "voting started");
        Ok(())
    }

    /// Record a vote; recasting overwrites.
    ///
    /// Returns the elected participant once every connected participant has
    /// voted.
    pub fn cast_vote(&mut self, voter: &str, candidate: &str) -> Result<Option<String>, LobbyError> {
        self.require_phase(LobbyPhase::Voting)?;
        if self.participant(candidate).is_none() {
            return Err(LobbyError::NotParticipant(candidate.to_string()));
        }
        self.participant_mut(voter)?.voted_for = Some(candidate.to_string());
        debug!(voter, candidate, "vote cast");

        let everyone_voted = self
            .participants
            .iter()
            .filter(|p| p.is_connected)
            .all(|p| p.voted_for.is_some());
        if everyone_voted {
            return self.finish_voting().map(Some);
        }
        Ok(None)
    }

    /// Owner ends the vote early.
    pub fn close_voting(&mut self, by: &str) -> Result<String, LobbyError> {
        self.require_owner(by)?;
        self.require_phase(LobbyPhase::Voting)?;
        self.finish_voting()
    }

    fn finish_voting(&mut self) -> Result<String, LobbyError> {
        let winner = tally(&self.participants).ok_or(LobbyError::NoVotes)?;
        self.elected = Some(winner.clone());
        self.phase = LobbyPhase::PinSetup;
        info!(elected = %winner, "vote tallied");
        Ok(winner)
    }

    /// Elected participant sets the secret.
    pub fn set_secret(&mut self, by: &str, secret: &str) -> Result<(), LobbyError> {
        self.require_phase(LobbyPhase::PinSetup)?;
        if self.elected.as_deref() != Some(by) {
            return Err(LobbyError::NotElected);
        }
        if secret.is_empty() {
            return Err(LobbyError::EmptySecret);
        }
        self.secret = Some(secret.to_string());
        self.phase = LobbyPhase::ReadyToStart;
        Ok(())
    }

    /// Owner starts the hunt: elected → `mrx`, everyone else in join order → `d1..`.
    pub fn start(&self, by: &str) -> Result<StartParameters, LobbyError> {
        self.require_owner(by)?;
        self.require_phase(LobbyPhase::ReadyToStart)?;
        let (Some(elected), Some(secret)) = (&self.elected, &self.secret) else {
            return Err(LobbyError::WrongPhase(self.phase));
        };

        let mut assignments = vec![(elected.clone(), Role::MrX)];
        let mut next = 1u8;
        for p in self.participants.iter().filter(|p| &p.id != elected) {
            assignments.push((p.id.clone(), Role::Detective(next)));
            next += 1;
        }

        Ok(StartParameters {
            detective_count: next - 1,
            secret: secret.clone(),
            assignments,
        })
    }

    /// Remove a participant (leave or kick).
    ///
    /// Outside `waiting` the lobby falls back to `waiting`: the vote and any
    /// role assignment no longer match the room.
    pub fn remove_participant(&mut self, id: &str) -> Result<Participant, LobbyError> {
        let idx = self
            .participants
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| LobbyError::NotParticipant(id.to_string()))?;
        if self.participants[idx].is_owner {
            return Err(LobbyError::CannotRemoveOwner);
        }
        let removed = self.participants.remove(idx);
        if self.phase != LobbyPhase::Waiting {
            self.reset();
        }
        Ok(removed)
    }

    /// Back to `waiting` with readiness, votes and the secret cleared.
    pub fn reset(&mut self) {
        for p in &mut self.participants {
            p.is_ready = false;
            p.voted_for = None;
        }
        self.elected = None;
        self.secret = None;
        self.phase = LobbyPhase::Waiting;
        debug!("lobby reset to waiting");
    }

    /// Lobby view for `lobby-update`.
    pub fn snapshot(&self) -> LobbySnapshot {
        LobbySnapshot {
            phase: self.phase,
            participants: self.participants.clone(),
            elected: self.elected.clone(),
            secret_set: self.secret.is_some(),
        }
    }

    /// Convert to JSON for logs and debugging views.
    pub fn to_json(&self) -> serde_json::Value {
        let participants: Vec<serde_json::Value> = self
            .participants
            .iter()
            .map(|p| {
                serde_json::json!({
                    "id": p.id,
                    "name": p.name,
                    "is_ready": p.is_ready,
                    "is_connected": p.is_connected,
                    "has_voted": p.voted_for.is_some(),
                    "is_owner": p.is_owner
                })
            })
            .collect();

        serde_json::json!({
            "phase": self.phase.as_str(),
            "participants": participants,
            "elected": self.elected,
            "secret_set": self.secret.is_some()
        })
    }
}

/// Plurality winner; ties go to whoever joined first.
pub fn tally(participants: &[Participant]) -> Option<String> {
    let count = |id: &str| {
        participants
            .iter()
            .filter(|p| p.voted_for.as_deref() == Some(id))
            .count()
    };
    let best = participants.iter().map(|p| count(&p.id)).max()?;
    if best == 0 {
        return None;
    }
    participants
        .iter()
        .find(|p| count(&p.id) == best)
        .map(|p| p.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lobby_with(names: &[&str]) -> LobbyCoordinator {
        let mut lobby = LobbyCoordinator::new("host", "Host", 0);
        for (i, name) in names.iter().enumerate() {
            lobby.join(name, name, i as u32 + 1).unwrap();
        }
        lobby
    }

    fn ready_all(lobby: &mut LobbyCoordinator) {
        let ids: Vec<String> = lobby.participants().iter().map(|p| p.id.clone()).collect();
        for id in ids {
            lobby.set_ready(&id, true).unwrap();
        }
    }

    fn voting(names: &[&str]) -> LobbyCoordinator {
        let mut lobby = lobby_with(names);
        ready_all(&mut lobby);
        lobby.begin_voting("host").unwrap();
        lobby
    }

    #[test]
    fn test_join_limits() {
        let mut lobby = lobby_with(&["a", "b", "c", "d", "e"]);
        assert!(lobby.is_full());
        assert_eq!(lobby.join("f", "f", 0), Err(LobbyError::Full));
        assert_eq!(lobby.join("a", "a", 0), Err(LobbyError::AlreadyJoined));
    }

    #[test]
    fn test_join_rejected_outside_waiting() {
        let mut lobby = voting(&["a", "b"]);
        assert_eq!(
            lobby.join("z", "z", 0),
            Err(LobbyError::WrongPhase(LobbyPhase::Voting))
        );
    }

    #[test]
    fn test_begin_voting_gates() {
        let mut lobby = lobby_with(&["a"]);
        ready_all(&mut lobby);
        assert_eq!(
            lobby.begin_voting("host"),
            Err(LobbyError::NotEnoughParticipants(2))
        );

        lobby.join("b", "b", 0).unwrap();
        assert_eq!(lobby.begin_voting("host"), Err(LobbyError::NotAllReady));
        lobby.set_ready("b", true).unwrap();
        assert_eq!(lobby.begin_voting("a"), Err(LobbyError::NotOwner));
        lobby.begin_voting("host").unwrap();
        assert_eq!(lobby.phase(), LobbyPhase::Voting);
    }

    #[test]
    fn test_plurality_vote() {
        let mut lobby = voting(&["a", "b"]);
        assert_eq!(lobby.cast_vote("host", "a").unwrap(), None);
        assert_eq!(lobby.cast_vote("a", "b").unwrap(), None);
        assert_eq!(lobby.cast_vote("b", "a").unwrap(), Some("a".to_string()));
        assert_eq!(lobby.phase(), LobbyPhase::PinSetup);
        assert_eq!(lobby.elected(), Some("a"));
    }

    #[test]
    fn test_recast_overwrites() {
        let mut lobby = voting(&["a", "b"]);
        lobby.cast_vote("host", "b").unwrap();
        lobby.cast_vote("host", "a").unwrap();
        lobby.cast_vote("a", "a").unwrap();
        assert_eq!(lobby.cast_vote("b", "b").unwrap(), Some("a".to_string()));
    }

    #[test]
    fn test_tie_goes_to_first_joined() {
        let mut lobby = voting(&["a", "b"]);
        lobby.cast_vote("a", "b").unwrap();
        lobby.cast_vote("b", "a").unwrap();
        assert_eq!(lobby.close_voting("host").unwrap(), "a");
    }

    #[test]
    fn test_close_voting_requires_votes() {
        let mut lobby = voting(&["a", "b"]);
        assert_eq!(lobby.close_voting("a"), Err(LobbyError::NotOwner));
        assert_eq!(lobby.close_voting("host"), Err(LobbyError::NoVotes));
    }

    #[test]
    fn test_disconnected_participant_not_awaited() {
        let mut lobby = voting(&["a", "b"]);
        lobby.set_connected("b", false).unwrap();
        lobby.cast_vote("host", "b").unwrap();
        assert_eq!(lobby.cast_vote("a", "b").unwrap(), Some("b".to_string()));
    }

    #[test]
    fn test_secret_and_start() {
        let mut lobby = voting(&["a", "b"]);
        lobby.cast_vote("host", "a").unwrap();
        lobby.cast_vote("a", "a").unwrap();
        lobby.cast_vote("b", "host").unwrap();

        assert_eq!(lobby.set_secret("host", "12"), Err(LobbyError::NotElected));
        assert_eq!(lobby.set_secret("a", ""), Err(LobbyError::EmptySecret));
        assert!(lobby.start("host").is_err());
        lobby.set_secret("a", "4321").unwrap();
        assert_eq!(lobby.phase(), LobbyPhase::ReadyToStart);
        assert!(lobby.secret_set());

        assert_eq!(lobby.start("a"), Err(LobbyError::NotOwner));
        let params = lobby.start("host").unwrap();
        assert_eq!(params.detective_count, 2);
        assert_eq!(params.secret, "4321");
        assert_eq!(
            params.assignments,
            vec![
                ("a".to_string(), Role::MrX),
                ("host".to_string(), Role::Detective(1)),
                ("b".to_string(), Role::Detective(2)),
            ]
        );
        assert_eq!(params.role_of("b"), Some(Role::Detective(2)));
    }

    #[test]
    fn test_remove_resets_to_waiting() {
        let mut lobby = voting(&["a", "b", "c"]);
        lobby.cast_vote("host", "a").unwrap();

        let removed = lobby.remove_participant("c").unwrap();
        assert_eq!(removed.id, "c");
        assert_eq!(lobby.phase(), LobbyPhase::Waiting);
        assert!(lobby.participants().iter().all(|p| !p.is_ready && p.voted_for.is_none()));
        assert_eq!(lobby.elected(), None);

        assert_eq!(
            lobby.remove_participant("host"),
            Err(LobbyError::CannotRemoveOwner)
        );
        assert_eq!(
            lobby.remove_participant("zz"),
            Err(LobbyError::NotParticipant("zz".to_string()))
        );
    }

    #[test]
    fn test_remove_in_waiting_keeps_readiness() {
        let mut lobby = lobby_with(&["a", "b"]);
        lobby.set_ready("a", true).unwrap();
        lobby.remove_participant("b").unwrap();
        assert!(lobby.participant("a").unwrap().is_ready);
    }

    #[test]
    fn test_snapshot_and_json() {
        let lobby = lobby_with(&["a"]);
        let snapshot = lobby.snapshot();
        assert_eq!(snapshot.phase, LobbyPhase::Waiting);
        assert_eq!(snapshot.participants.len(), 2);
        assert!(!snapshot.secret_set);

        let json = lobby.to_json();
        assert_eq!(json["phase"], "waiting");
        assert_eq!(json["participants"][0]["is_owner"], true);
        assert_eq!(
            serde_json::to_value(LobbyPhase::PinSetup).unwrap(),
            serde_json::json!("pin-setup")
        );
    }
}
