//! A joining participant's side of a session.
//!
//! Holds a read-only projection of the game pushed by the host and turns local
//! actions into intents. Nothing here mutates game state.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::message::{MessageBody, MoveIntent, PeerMessage};
use super::transport::{establish, host_address, LinkEvent, LinkSender, Transport, TransportError};
use super::SessionError;
use crate::config::NetworkConfig;
use crate::state::{GameState, LobbySnapshot, Role, TransportMode};

/// The host asked this peer to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnPrompt {
    pub role: Role,
    pub round: u8,
    /// Second leg of a double move
    pub second_leg: bool,
}

/// Peer side of an online session.
pub struct PeerSession {
    peer_id: String,
    host: String,
    sender: Arc<dyn LinkSender>,
    events: mpsc::Receiver<LinkEvent>,
    accepted: bool,
    lobby: Option<LobbySnapshot>,
    elected: Option<String>,
    detective_count: Option<u8>,
    role: Option<Role>,
    state: Option<GameState>,
    prompt: Option<TurnPrompt>,
    last_rejection: Option<String>,
    ended: Option<SessionError>,
}

impl PeerSession {
    /// Open the link and send the join request without waiting for an answer.
    #[instrument(skip(transport, config))]
    pub async fn connect(
        transport: &dyn Transport,
        code: &str,
        name: &str,
        avatar: u32,
        config: &NetworkConfig,
    ) -> Result<Self, SessionError> {
        let session = Self::open(transport, code, config).await?;
        if let Err(e) = session.send(join_request(name, avatar)).await {
            session.abandon().await;
            return Err(e);
        }
        debug!(peer = %session.peer_id, "join requested");
        Ok(session)
    }

    /// Connect and wait for the host's answer, all within the connect timeout.
    ///
    /// On any failure the link is torn down before returning.
    pub async fn join(
        transport: &dyn Transport,
        code: &str,
        name: &str,
        avatar: u32,
        config: &NetworkConfig,
    ) -> Result<Self, SessionError> {
        let limit = config.connect_timeout();
        let deadline = Instant::now() + limit;
        let mut session = Self::open(transport, code, config).await?;

        let handshake = async {
            session.send(join_request(name, avatar)).await?;
            session.await_acceptance().await
        };
        let answer = match tokio::time::timeout_at(deadline, handshake).await {
            Ok(answer) => answer,
            Err(_) => Err(TransportError::Timeout(limit).into()),
        };
        match answer {
            Ok(()) => Ok(session),
            Err(e) => {
                session.abandon().await;
                Err(e)
            }
        }
    }

    async fn open(
        transport: &dyn Transport,
        code: &str,
        config: &NetworkConfig,
    ) -> Result<Self, SessionError> {
        let host = host_address(code);
        let endpoint = establish(transport, &host, config.connect_timeout()).await?;
        Ok(Self {
            peer_id: endpoint.local_id,
            host,
            sender: endpoint.sender,
            events: endpoint.events,
            accepted: false,
            lobby: None,
            elected: None,
            detective_count: None,
            role: None,
            state: None,
            prompt: None,
            last_rejection: None,
            ended: None,
        })
    }

    async fn await_acceptance(&mut self) -> Result<(), SessionError> {
        while !self.accepted {
            let open = self.step().await;
            if let Some(err) = &self.ended {
                return Err(err.clone());
            }
            if !open {
                return Err(SessionError::Closed);
            }
        }
        Ok(())
    }

    /// Drop the link to the host.
    async fn abandon(&self) {
        if let Err(e) = self.sender.shutdown().await {
            debug!(peer = %self.peer_id, error = %e, "link shutdown");
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    pub fn lobby(&self) -> Option<&LobbySnapshot> {
        self.lobby.as_ref()
    }

    pub fn elected(&self) -> Option<&str> {
        self.elected.as_deref()
    }

    pub fn detective_count(&self) -> Option<u8> {
        self.detective_count
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Latest projection from the host.
    pub fn state(&self) -> Option<&GameState> {
        self.state.as_ref()
    }

    pub fn prompt(&self) -> Option<TurnPrompt> {
        self.prompt
    }

    pub fn last_rejection(&self) -> Option<&str> {
        self.last_rejection.as_deref()
    }

    /// Why the session ended, if it has.
    pub fn ended(&self) -> Option<&SessionError> {
        self.ended.as_ref()
    }

    /// It is this peer's move.
    pub fn is_my_turn(&self) -> bool {
        matches!((self.prompt, self.role), (Some(p), Some(r)) if p.role == r)
    }

    /// Wait for and process one event. Returns `false` once the link is gone.
    pub async fn step(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.handle_event(event);
                self.ended.is_none()
            }
            None => {
                if self.ended.is_none() {
                    self.ended = Some(SessionError::Closed);
                }
                false
            }
        }
    }

    /// Process whatever is already queued without waiting.
    pub fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Message { link, message } if link == self.host => {
                self.handle_message(message)
            }
            LinkEvent::Message { link, .. } => debug!(%link, "message from unknown link"),
            LinkEvent::Closed { .. } => {
                info!(peer = %self.peer_id, "host closed the link");
                if self.ended.is_none() {
                    self.ended = Some(SessionError::Closed);
                }
            }
            LinkEvent::Error { error, .. } => warn!(peer = %self.peer_id, %error, "link error"),
            LinkEvent::Opened { .. } => {}
        }
    }

    fn handle_message(&mut self, message: PeerMessage) {
        if !message.body.is_host_only() {
            debug!(kind = message.kind(), "discarding peer-only kind from host");
            return;
        }
        match message.body {
            MessageBody::JoinAccepted { peer_id } => {
                self.accepted = true;
                self.peer_id = peer_id;
            }
            MessageBody::JoinRejected { reason } => {
                self.ended = Some(SessionError::Rejected(reason));
            }
            MessageBody::LobbyUpdate(snapshot) => {
                if snapshot.elected.is_none() {
                    self.elected = None;
                }
                self.lobby = Some(snapshot);
            }
            MessageBody::VoteStart => self.elected = None,
            MessageBody::VoteResult { elected } => self.elected = Some(elected),
            MessageBody::StartHunt { detective_count } => {
                self.detective_count = Some(detective_count);
                self.prompt = None;
            }
            MessageBody::GameStarted { role, state } => {
                info!(peer = %self.peer_id, %role, "game started");
                self.role = Some(role);
                self.state = Some(*state);
            }
            MessageBody::StateSync { state } => {
                if self.prompt.is_some_and(|p| prompt_answered(&state, p)) {
                    self.prompt = None;
                }
                self.state = Some(*state);
            }
            MessageBody::TurnNotify { role, round } => {
                self.prompt = Some(TurnPrompt {
                    role,
                    round,
                    second_leg: false,
                });
            }
            MessageBody::RequestMove { role, round } => {
                self.prompt = Some(TurnPrompt {
                    role,
                    round,
                    second_leg: true,
                });
            }
            MessageBody::MoveRejected { reason } => {
                debug!(%reason, "move rejected");
                self.last_rejection = Some(reason);
            }
            MessageBody::Kick { reason } => {
                info!(peer = %self.peer_id, %reason, "kicked");
                self.ended = Some(SessionError::Kicked(reason));
            }
            other => debug!(kind = other.kind(), "unexpected kind"),
        }
    }

    async fn send(&self, body: MessageBody) -> Result<(), SessionError> {
        if let Some(err) = &self.ended {
            return Err(err.clone());
        }
        let message = PeerMessage::new(&self.peer_id, body);
        self.sender.send(&self.host, &message).await?;
        Ok(())
    }

    pub async fn set_ready(&self, ready: bool) -> Result<(), SessionError> {
        let body = if ready {
            MessageBody::PlayerReady
        } else {
            MessageBody::PlayerUnready
        };
        self.send(body).await
    }

    pub async fn cast_vote(&self, candidate: &str) -> Result<(), SessionError> {
        self.send(MessageBody::VoteCast {
            candidate: candidate.to_string(),
        })
        .await
    }

    pub async fn set_secret(&self, secret: &str) -> Result<(), SessionError> {
        self.send(MessageBody::SecretSet {
            secret: secret.to_string(),
        })
        .await
    }

    /// Send a move for this peer's role.
    pub async fn submit_move(
        &mut self,
        location: u16,
        transport: TransportMode,
        double_move: bool,
    ) -> Result<(), SessionError> {
        let role = self.role.ok_or(SessionError::NoRole)?;
        self.last_rejection = None;
        self.send(MessageBody::MoveSubmit(MoveIntent {
            role,
            location,
            transport,
            double_move,
        }))
        .await
    }

    /// Ask the host to flip a round's manual reveal (Mr. X only).
    pub async fn toggle_reveal(&self, round: u8) -> Result<(), SessionError> {
        self.send(MessageBody::RevealToggle { round }).await
    }

    /// Leave the session.
    pub async fn leave(self) {
        self.abandon().await;
    }
}

fn join_request(name: &str, avatar: u32) -> MessageBody {
    MessageBody::JoinRequest {
        name: name.to_string(),
        avatar,
    }
}

/// The prompted leg is recorded, or the game is over.
fn prompt_answered(state: &GameState, prompt: TurnPrompt) -> bool {
    if state.is_over() {
        return true;
    }
    let Some(entry) = state.round(prompt.round).and_then(|r| r.entry(prompt.role)) else {
        return true;
    };
    if prompt.second_leg {
        entry.second_transport.is_some()
    } else {
        entry.transport.is_some() || entry.stranded
    }
}
