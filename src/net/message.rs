//! Wire envelope for peer messages.
//!
//! Every message travels as
//! `{"kind": "...", "payload": {...}, "sender": "...", "timestamp": <ms>}`
//! with kebab-case kinds.

use serde::{Deserialize, Serialize};

use crate::state::{GameState, LobbySnapshot, Role, TransportMode};

/// A move as sent by the acting participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveIntent {
    pub role: Role,
    pub location: u16,
    pub transport: TransportMode,
    #[serde(default)]
    pub double_move: bool,
}

/// Message kinds and their payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum MessageBody {
    JoinRequest { name: String, avatar: u32 },
    JoinAccepted { peer_id: String },
    JoinRejected { reason: String },
    LobbyUpdate(LobbySnapshot),
    PlayerReady,
    PlayerUnready,
    VoteStart,
    VoteCast { candidate: String },
    VoteResult { elected: String },
    SecretSet { secret: String },
    StartHunt { detective_count: u8 },
    GameStarted { role: Role, state: Box<GameState> },
    MoveSubmit(MoveIntent),
    MoveRejected { reason: String },
    StateSync { state: Box<GameState> },
    RequestMove { role: Role, round: u8 },
    TurnNotify { role: Role, round: u8 },
    RevealToggle { round: u8 },
    Kick { reason: String },
}

impl MessageBody {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinRequest { .. } => "join-request",
            Self::JoinAccepted { .. } => "join-accepted",
            Self::JoinRejected { .. } => "join-rejected",
            Self::LobbyUpdate(_) => "lobby-update",
            Self::PlayerReady => "player-ready",
            Self::PlayerUnready => "player-unready",
            Self::VoteStart => "vote-start",
            Self::VoteCast { .. } => "vote-cast",
            Self::VoteResult { .. } => "vote-result",
            Self::SecretSet { .. } => "secret-set",
            Self::StartHunt { .. } => "start-hunt",
            Self::GameStarted { .. } => "game-started",
            Self::MoveSubmit(_) => "move-submit",
            Self::MoveRejected { .. } => "move-rejected",
            Self::StateSync { .. } => "state-sync",
            Self::RequestMove { .. } => "request-move",
            Self::TurnNotify { .. } => "turn-notify",
            Self::RevealToggle { .. } => "reveal-toggle",
            Self::Kick { .. } => "kick",
        }
    }

    /// Only a host may send this kind.
    pub fn is_host_only(&self) -> bool {
        !matches!(
            self,
            Self::JoinRequest { .. }
                | Self::PlayerReady
                | Self::PlayerUnready
                | Self::VoteCast { .. }
                | Self::SecretSet { .. }
                | Self::MoveSubmit(_)
                | Self::RevealToggle { .. }
        )
    }
}

/// Message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerMessage {
    #[serde(flatten)]
    pub body: MessageBody,
    pub sender: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl PeerMessage {
    pub fn new(sender: impl Into<String>, body: MessageBody) -> Self {
        Self {
            body,
            sender: sender.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
