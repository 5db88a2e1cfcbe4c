//! The session owner.
//!
//! [`HostSession`] holds the only writable [`GameState`]. Peer intents arrive as
//! [`LinkEvent`]s and are checked against the sender's role and the engine's
//! current actor before anything runs; after every committed transition each
//! connected peer gets its own projection, and the role now up gets an explicit
//! prompt. All mutation goes through `&mut self`, one event at a time.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::message::{MessageBody, MoveIntent, PeerMessage};
use super::projection::project;
use super::transport::{host_address, listen, LinkEvent, LinkSender, Transport, TransportError};
use super::SessionError;
use crate::config::NetworkConfig;
use crate::state::{
    GameEngine, GameError, GameState, LobbyCoordinator, PeerLink, PeerRegistry, Role,
    RoundOutcome, TurnAdvance,
};
use crate::store::{generate_code, generate_session_id, PersistenceWriter, SessionMeta};

/// Attempts at finding a free session code.
const CODE_ATTEMPTS: usize = 5;

/// Last turn prompt sent: role, round, second leg.
type Prompt = (Role, u8, bool);

/// Host side of an online session.
pub struct HostSession {
    session_id: String,
    code: String,
    host_id: String,
    sender: Arc<dyn LinkSender>,
    events: mpsc::Receiver<LinkEvent>,
    peers: PeerRegistry,
    lobby: LobbyCoordinator,
    engine: GameEngine,
    host_role: Option<Role>,
    last_prompt: Option<Prompt>,
    meta: SessionMeta,
    writer: Option<PersistenceWriter>,
}

impl HostSession {
    /// Open a session under a fresh code.
    pub async fn open(
        transport: &dyn Transport,
        host_name: &str,
        avatar: u32,
        config: &NetworkConfig,
    ) -> Result<Self, SessionError> {
        let mut last = None;
        for _ in 0..CODE_ATTEMPTS {
            match Self::open_with_code(transport, &generate_code(), host_name, avatar, config).await
            {
                Err(SessionError::Transport(TransportError::AddressInUse(address))) => {
                    debug!(%address, "session code taken, retrying");
                    last = Some(address);
                }
                other => return other,
            }
        }
        Err(TransportError::AddressInUse(last.unwrap_or_default()).into())
    }

    /// Open a session under a given code.
    #[instrument(skip(transport, config), fields(session = %code))]
    pub async fn open_with_code(
        transport: &dyn Transport,
        code: &str,
        host_name: &str,
        avatar: u32,
        config: &NetworkConfig,
    ) -> Result<Self, SessionError> {
        let endpoint = listen(transport, &host_address(code), config.connect_timeout()).await?;
        let session_id = generate_session_id();
        info!(session_id = %session_id, "session open");

        Ok(Self {
            meta: SessionMeta::new(&session_id, code, host_name),
            session_id,
            code: code.to_string(),
            lobby: LobbyCoordinator::new(&endpoint.local_id, host_name, avatar),
            host_id: endpoint.local_id,
            sender: endpoint.sender,
            events: endpoint.events,
            peers: PeerRegistry::new(),
            engine: GameEngine::new(),
            host_role: None,
            last_prompt: None,
            writer: None,
        })
    }

    /// Persist the session in the background after every transition.
    pub fn with_persistence(mut self, writer: PersistenceWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The owner's own participant id.
    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn host_role(&self) -> Option<Role> {
        self.host_role
    }

    pub fn lobby(&self) -> &LobbyCoordinator {
        &self.lobby
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn state(&self) -> &GameState {
        self.engine.state()
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    /// Process events until the transport goes away.
    pub async fn run(mut self) -> Self {
        while let Some(event) = self.events.recv().await {
            self.handle_event(event).await;
        }
        info!(session = %self.code, "event stream ended");
        self
    }

    /// Wait for and process one event. Returns `false` once the stream ends.
    pub async fn step(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.handle_event(event).await;
                true
            }
            None => false,
        }
    }

    /// Process whatever is already queued without waiting.
    pub async fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    #[instrument(skip(self, event), fields(session = %self.code, link = %event.link()))]
    pub async fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened { link } => debug!(%link, "link opened"),
            LinkEvent::Message { link, message } => {
                self.peers.touch(&link);
                self.handle_message(&link, message).await;
            }
            LinkEvent::Closed { link } => self.handle_closed(&link).await,
            LinkEvent::Error { link, error } => warn!(%link, %error, "link error"),
        }
    }

    async fn handle_message(&mut self, link: &str, message: PeerMessage) {
        if message.body.is_host_only() {
            debug!(kind = message.kind(), "discarding host-only kind from peer");
            return;
        }
        if let MessageBody::JoinRequest { name, avatar } = &message.body {
            self.handle_join(link, name, *avatar).await;
            return;
        }
        if self.peers.get(link).is_none() {
            debug!(kind = message.kind(), "discarding message from unknown link");
            return;
        }

        match message.body {
            MessageBody::PlayerReady => self.change_ready(link, true).await,
            MessageBody::PlayerUnready => self.change_ready(link, false).await,
            MessageBody::VoteCast { candidate } => {
                if let Err(e) = self.record_vote(link, &candidate).await {
                    debug!(error = %e, "vote discarded");
                }
            }
            MessageBody::SecretSet { secret } => match self.lobby.set_secret(link, &secret) {
                Ok(()) => self.broadcast_lobby().await,
                Err(e) => debug!(error = %e, "secret discarded"),
            },
            MessageBody::MoveSubmit(intent) => match self.apply_move(link, &intent).await {
                Ok(_) => {}
                Err(SessionError::Game(e)) => {
                    let reason = e.to_string();
                    self.send_to(link, MessageBody::MoveRejected { reason }).await;
                }
                Err(e) => debug!(error = %e, role = %intent.role, "move discarded"),
            },
            MessageBody::RevealToggle { round } => {
                if let Err(e) = self.apply_reveal_toggle(link, round).await {
                    debug!(error = %e, round, "reveal toggle discarded");
                }
            }
            other => debug!(kind = other.kind(), "unexpected kind"),
        }
    }

    async fn handle_join(&mut self, link: &str, name: &str, avatar: u32) {
        if self.peers.get(link).is_some() {
            debug!("duplicate join request");
            return;
        }
        let joined = if self.engine.state().status.is_active() {
            Err(SessionError::Game(GameError::GameInProgress))
        } else {
            self.lobby.join(link, name, avatar).map_err(SessionError::from)
        };
        match joined {
            Ok(()) => {
                self.peers.add(PeerLink::new(link, name));
                info!(peer = link, name, "participant joined");
                self.send_to(
                    link,
                    MessageBody::JoinAccepted {
                        peer_id: link.to_string(),
                    },
                )
                .await;
                self.broadcast_lobby().await;
            }
            Err(e) => {
                info!(peer = link, reason = %e, "join rejected");
                self.send_to(
                    link,
                    MessageBody::JoinRejected {
                        reason: e.to_string(),
                    },
                )
                .await;
                if let Err(e) = self.sender.close(link).await {
                    debug!(error = %e, "close after rejection failed");
                }
            }
        }
    }

    async fn change_ready(&mut self, link: &str, ready: bool) {
        match self.lobby.set_ready(link, ready) {
            Ok(()) => self.broadcast_lobby().await,
            Err(e) => debug!(error = %e, "ready change discarded"),
        }
    }

    async fn handle_closed(&mut self, link: &str) {
        if self.forget(link) {
            self.broadcast_lobby().await;
        }
    }

    /// Record a lost link. Mid-game the role stays assigned, orphaned to the
    /// owner; in the lobby the participant leaves. Returns whether `link` was
    /// a known peer.
    fn forget(&mut self, link: &str) -> bool {
        if self.peers.get(link).is_none() {
            return false;
        }
        self.peers.disconnect(link);
        info!(peer = link, "peer disconnected");

        if self.engine.state().status.is_active() {
            if let Err(e) = self.lobby.set_connected(link, false) {
                debug!(peer = link, error = %e, "lobby did not track link");
            }
            if let (Some(role), Some((prompted, ..))) = (self.peers.role_of(link), self.last_prompt) {
                if role == prompted {
                    self.last_prompt = None;
                }
            }
        } else {
            self.peers.remove(link);
            if let Err(e) = self.lobby.remove_participant(link) {
                debug!(peer = link, error = %e, "lobby did not track link");
            }
        }
        true
    }

    /// May `from` act for `role`?
    ///
    /// A peer acts only for its own role. The owner acts for its own role and
    /// for any role no connected peer holds.
    fn authorized(&self, from: &str, role: Role) -> bool {
        if from == self.host_id {
            return self.host_role == Some(role) || !self.peers.is_role_connected(role);
        }
        self.peers.role_of(from) == Some(role)
            && self
                .peers
                .get(from)
                .is_some_and(|l| l.status.is_connected())
    }

    async fn apply_move(
        &mut self,
        from: &str,
        intent: &MoveIntent,
    ) -> Result<TurnAdvance, SessionError> {
        if !self.authorized(from, intent.role) {
            return Err(SessionError::Unauthorized(intent.role));
        }
        if self.engine.current_role() != Some(intent.role) {
            return Err(SessionError::NotYourTurn(intent.role));
        }

        self.engine.submit_location(intent.location)?;
        let advance = match self
            .engine
            .select_transport(intent.transport, intent.double_move)
        {
            Ok(advance) => advance,
            Err(e) => {
                self.engine.cancel_pending();
                return Err(e.into());
            }
        };
        debug!(role = %intent.role, location = intent.location, ?advance, "move applied");
        self.publish().await;
        Ok(advance)
    }

    async fn apply_reveal_toggle(&mut self, from: &str, round: u8) -> Result<bool, SessionError> {
        if !self.authorized(from, Role::MrX) {
            return Err(SessionError::Unauthorized(Role::MrX));
        }
        let revealed = self.engine.toggle_manual_reveal(round)?;
        self.publish().await;
        Ok(revealed)
    }

    async fn record_vote(&mut self, voter: &str, candidate: &str) -> Result<(), SessionError> {
        let elected = self.lobby.cast_vote(voter, candidate)?;
        if let Some(elected) = elected {
            self.broadcast(MessageBody::VoteResult { elected }).await;
        }
        self.broadcast_lobby().await;
        Ok(())
    }

    // Owner actions

    pub async fn set_ready(&mut self, ready: bool) -> Result<(), SessionError> {
        let host_id = self.host_id.clone();
        self.lobby.set_ready(&host_id, ready)?;
        self.broadcast_lobby().await;
        Ok(())
    }

    #[instrument(skip(self), fields(session = %self.code))]
    pub async fn begin_voting(&mut self) -> Result<(), SessionError> {
        let host_id = self.host_id.clone();
        self.lobby.begin_voting(&host_id)?;
        self.broadcast(MessageBody::VoteStart).await;
        self.broadcast_lobby().await;
        Ok(())
    }

    pub async fn cast_vote(&mut self, candidate: &str) -> Result<(), SessionError> {
        let host_id = self.host_id.clone();
        self.record_vote(&host_id, candidate).await
    }

    pub async fn close_voting(&mut self) -> Result<String, SessionError> {
        let host_id = self.host_id.clone();
        let elected = self.lobby.close_voting(&host_id)?;
        self.broadcast(MessageBody::VoteResult {
            elected: elected.clone(),
        })
        .await;
        self.broadcast_lobby().await;
        Ok(elected)
    }

    /// Set the secret when the owner is the elected player.
    pub async fn set_secret(&mut self, secret: &str) -> Result<(), SessionError> {
        let host_id = self.host_id.clone();
        self.lobby.set_secret(&host_id, secret)?;
        self.broadcast_lobby().await;
        Ok(())
    }

    /// Hand the lobby's assignment to the engine and tell everyone their role.
    #[instrument(skip(self), fields(session = %self.code))]
    pub async fn start_hunt(&mut self) -> Result<(), SessionError> {
        let params = self.lobby.start(&self.host_id)?;
        self.engine.start(params.detective_count, &params.secret)?;

        self.peers.clear_roles();
        self.host_role = None;
        for (id, role) in &params.assignments {
            if *id == self.host_id {
                self.host_role = Some(*role);
            } else {
                self.peers.assign_role(id, *role);
            }
        }
        info!(
            detectives = params.detective_count,
            host_role = ?self.host_role,
            "hunt started"
        );

        self.broadcast(MessageBody::StartHunt {
            detective_count: params.detective_count,
        })
        .await;
        for peer in self.peers.connected_peers() {
            let Some(role) = self.peers.role_of(&peer) else {
                continue;
            };
            let state = Box::new(project(self.engine.state(), Some(role)));
            self.send_to(&peer, MessageBody::GameStarted { role, state })
                .await;
        }
        self.last_prompt = None;
        self.prompt_current().await;
        self.persist();
        Ok(())
    }

    /// Move for the owner's role or an unheld one.
    pub async fn submit_move(&mut self, intent: MoveIntent) -> Result<TurnAdvance, SessionError> {
        let host_id = self.host_id.clone();
        self.apply_move(&host_id, &intent).await
    }

    pub async fn toggle_reveal(&mut self, round: u8) -> Result<bool, SessionError> {
        let host_id = self.host_id.clone();
        self.apply_reveal_toggle(&host_id, round).await
    }

    /// Take back a move in the current round.
    pub async fn undo_move(&mut self, role: Role) -> Result<Role, SessionError> {
        let next = self.engine.undo_move(role)?;
        self.publish().await;
        Ok(next)
    }

    /// Lock the current round.
    #[instrument(skip(self), fields(session = %self.code, round = self.engine.state().current_round))]
    pub async fn lock_round(&mut self) -> Result<RoundOutcome, SessionError> {
        let outcome = self.engine.lock_round()?;
        info!(?outcome, "round locked");
        self.publish().await;
        Ok(outcome)
    }

    /// Remove a peer immediately.
    #[instrument(skip(self), fields(session = %self.code))]
    pub async fn kick(&mut self, peer: &str, reason: &str) -> Result<(), SessionError> {
        if self.peers.get(peer).is_none() {
            return Err(crate::state::LobbyError::NotParticipant(peer.to_string()).into());
        }
        self.send_to(
            peer,
            MessageBody::Kick {
                reason: reason.to_string(),
            },
        )
        .await;
        if let Err(e) = self.sender.close(peer).await {
            debug!(error = %e, "close after kick failed");
        }
        self.peers.kick(peer, reason);
        if let Err(e) = self.lobby.remove_participant(peer) {
            debug!(peer, error = %e, "lobby did not track kicked peer");
        }
        info!(peer, reason, "peer kicked");

        self.broadcast_lobby().await;
        if self.engine.state().status.is_active() {
            // The kicked role is now the owner's to play.
            self.last_prompt = None;
            self.publish().await;
        }
        Ok(())
    }

    /// Back to the lobby for another game.
    pub async fn new_game(&mut self) {
        self.engine.reset();
        self.lobby.reset();
        self.peers.clear_roles();
        self.host_role = None;
        self.last_prompt = None;
        self.broadcast_lobby().await;
        self.persist();
    }

    /// Stop listening and flush persistence.
    pub async fn close(self) {
        if let Err(e) = self.sender.shutdown().await {
            warn!(error = %e, "transport shutdown failed");
        }
        if let Some(writer) = self.writer {
            writer.shutdown().await;
        }
        info!(session = %self.code, "session closed");
    }

    // Outbound

    async fn send_to(&mut self, peer: &str, body: MessageBody) {
        let seq = self.peers.get_mut(peer).map(|l| l.next_seq());
        let kind = body.kind();
        let message = PeerMessage::new(&self.host_id, body);
        match self.sender.send(peer, &message).await {
            Ok(()) => debug!(peer, kind, ?seq, "sent"),
            Err(e) => {
                warn!(peer, kind, error = %e, "send failed, dropping link");
                if let Err(e) = self.sender.close(peer).await {
                    debug!(peer, error = %e, "close after failed send");
                }
                self.forget(peer);
            }
        }
    }

    async fn broadcast(&mut self, body: MessageBody) {
        for peer in self.peers.connected_peers() {
            self.send_to(&peer, body.clone()).await;
        }
    }

    async fn broadcast_lobby(&mut self) {
        let snapshot = self.lobby.snapshot();
        self.broadcast(MessageBody::LobbyUpdate(snapshot)).await;
    }

    /// Push per-peer projections, prompt the active role, persist.
    async fn publish(&mut self) {
        for peer in self.peers.connected_peers() {
            let role = self.peers.role_of(&peer);
            let state = Box::new(project(self.engine.state(), role));
            self.send_to(&peer, MessageBody::StateSync { state }).await;
        }
        self.prompt_current().await;
        self.persist();
    }

    async fn prompt_current(&mut self) {
        let Some(role) = self.engine.current_role() else {
            self.last_prompt = None;
            return;
        };
        let state = self.engine.state();
        let prompt = (role, state.current_round, state.awaiting_second_leg);
        if self.last_prompt == Some(prompt) {
            return;
        }
        self.last_prompt = Some(prompt);

        let Some(peer) = self
            .peers
            .peer_for_role(role)
            .filter(|l| l.status.is_connected())
            .map(|l| l.peer_id.clone())
        else {
            debug!(%role, "active role has no connected peer");
            return;
        };
        let (role, round, second_leg) = prompt;
        let body = if second_leg {
            MessageBody::RequestMove { role, round }
        } else {
            MessageBody::TurnNotify { role, round }
        };
        self.send_to(&peer, body).await;
    }

    fn persist(&mut self) {
        if let Some(writer) = &self.writer {
            self.meta.refresh(self.engine.state());
            writer.mark_dirty(&self.meta, self.engine.state());
        }
    }
}
