//! Game Hub
//!
//! Routes decoded client messages to the matchmaking queue, the session
//! store and the report desk. Transport-agnostic: a connection is an id
//! plus an outbound channel, so tests drive the hub with plain channels.
//!
//! Lock order: matchmaking queue, then session table, then a single
//! session. The client registry is never held while a session is locked.
//! A connection's session list is updated under the registry lock, so a
//! pairing either lands in the list before the connection leaves or is
//! resolved as a departure right after binding.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use super::auth::{authenticate, AuthConfig};
use super::matchmaking::{MatchOutcome, MatchmakingQueue, Seeker};
use super::protocol::{
    ChatRequest, ClientMessage, CreateRoomRequest, ErrorCode, FindMatchRequest, JoinRoomRequest,
    LocalGameRequest, MoveRequest, ReportRequest, ResignRequest, ServerError, ServerMessage,
    StartGameRequest, TimeoutClaim,
};
use super::session::{Departure, GameSession, Participant, SessionError, SessionManager, SharedSession};
use crate::core::{ConnectionId, SessionId};
use crate::game::state::{PlayerProfile, SessionStatus};
use crate::moderation::{ModerationPolicy, ReportDesk, ReportOutcome};
use crate::persist::Finalizer;

/// Hub behaviour settings.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Delay between finalization and removal of a session.
    pub grace_period: Duration,
    /// Check timeout claims against the server clock.
    pub verify_timeouts: bool,
    /// Slack allowed when verifying timeout claims.
    pub clock_tolerance: TimeDelta,
    /// Identity token settings.
    pub auth: AuthConfig,
    /// Report policy.
    pub moderation: ModerationPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            verify_timeouts: false,
            clock_tolerance: TimeDelta::milliseconds(2000),
            auth: AuthConfig::default(),
            moderation: ModerationPolicy::default(),
        }
    }
}

struct ConnectedClient {
    participant: Participant,
    sessions: BTreeSet<SessionId>,
    connected_at: DateTime<Utc>,
    verified_username: Option<String>,
}

type ClientRegistry = Arc<RwLock<BTreeMap<ConnectionId, ConnectedClient>>>;

/// Event router shared by all connections.
pub struct GameHub {
    config: HubConfig,
    sessions: Arc<SessionManager>,
    queue: MatchmakingQueue,
    reports: ReportDesk,
    finalizer: Finalizer,
    clients: ClientRegistry,
}

impl GameHub {
    /// Hub submitting finished games to `finalizer`.
    pub fn new(config: HubConfig, finalizer: Finalizer) -> Self {
        Self {
            sessions: Arc::new(SessionManager::new(config.grace_period)),
            queue: MatchmakingQueue::new(),
            reports: ReportDesk::new(config.moderation),
            finalizer,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            config,
        }
    }

    /// Live session table.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Matchmaking queues.
    pub fn queue(&self) -> &MatchmakingQueue {
        &self.queue
    }

    /// Report desk.
    pub fn reports(&self) -> &ReportDesk {
        &self.reports
    }

    /// Register a connection.
    pub async fn connect(&self, sender: mpsc::Sender<ServerMessage>) -> ConnectionId {
        let conn = ConnectionId::next();
        self.clients.write().await.insert(
            conn,
            ConnectedClient {
                participant: Participant::new(conn, sender),
                sessions: BTreeSet::new(),
                connected_at: Utc::now(),
                verified_username: None,
            },
        );
        debug!(%conn, "Client registered");
        conn
    }

    /// Connected clients.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Send to every connected client.
    pub async fn broadcast_all(&self, message: ServerMessage) {
        for client in self.clients.read().await.values() {
            client.participant.send(message.clone());
        }
    }

    /// Handle one message now.
    pub async fn handle(&self, conn: ConnectionId, message: ClientMessage) {
        self.handle_at(conn, message, Utc::now()).await
    }

    /// Handle one message at `now`.
    pub async fn handle_at(&self, conn: ConnectionId, message: ClientMessage, now: DateTime<Utc>) {
        let Some(participant) = self.participant(conn).await else {
            warn!(%conn, "Message from unregistered connection");
            return;
        };

        match message {
            ClientMessage::FindMatch(req) => self.find_match(participant, req, now).await,
            ClientMessage::CancelMatch => {
                self.queue.remove_connection(conn).await;
                participant.send(ServerMessage::status("cancelled"));
            }
            ClientMessage::Move(req) => self.play_move(conn, req, now).await,
            ClientMessage::Resign(req) => self.resign(conn, req, now).await,
            ClientMessage::Timeout(req) => self.timeout(conn, req, now).await,
            ClientMessage::ChatMessage(req) => self.chat(conn, req).await,
            ClientMessage::ReportPlayer(req) => self.report(participant, req, now).await,
            ClientMessage::CreateRoom(req) => self.create_room(participant, req, now).await,
            ClientMessage::JoinRoom(req) => self.join_room(participant, req, now).await,
            ClientMessage::StartGame(req) => self.start_game(participant, req, now).await,
            ClientMessage::LocalGame(req) => self.local_game(participant, req, now).await,
            ClientMessage::Ping { timestamp } => {
                participant.send(ServerMessage::Pong {
                    timestamp,
                    server_time: now.timestamp_millis(),
                });
            }
        }
    }

    /// Handle a connection going away now.
    pub async fn disconnect(&self, conn: ConnectionId) {
        self.disconnect_at(conn, Utc::now()).await
    }

    /// Handle a connection going away at `now`.
    pub async fn disconnect_at(&self, conn: ConnectionId, now: DateTime<Utc>) {
        self.queue.remove_connection(conn).await;

        let Some(client) = self.clients.write().await.remove(&conn) else {
            return;
        };
        debug!(
            %conn,
            sessions = client.sessions.len(),
            connected_secs = (now - client.connected_at).num_seconds(),
            "Client left"
        );

        for id in client.sessions {
            self.leave(conn, &id, now).await;
        }
    }

    // ===== HANDLERS =====

    async fn find_match(&self, participant: Participant, req: FindMatchRequest, now: DateTime<Utc>) {
        let profile = match authenticate(req.player.into_profile(), req.token.as_deref(), &self.config.auth) {
            Ok(profile) => profile,
            Err(e) => {
                debug!(conn = %participant.connection_id, error = %e, "Token rejected");
                participant.send(ServerMessage::error(ErrorCode::InvalidToken, e.to_string()));
                return;
            }
        };
        if self.is_restricted(&participant, &profile.username, now).await {
            return;
        }
        if self.config.auth.is_configured() {
            self.remember_identity(participant.connection_id, &profile.username).await;
        }

        let seeker = Seeker {
            profile,
            mode: req.mode,
            rated: req.rated,
            participant: participant.clone(),
        };
        match self.queue.enqueue_or_match(&self.sessions, seeker, now).await {
            None => {}
            Some(MatchOutcome::Waiting) => {
                participant.send(ServerMessage::status("waiting"));
            }
            Some(MatchOutcome::Matched(session)) => self.start_matched(session, now).await,
        }
    }

    async fn start_matched(&self, session: SharedSession, now: DateTime<Utc>) {
        let (id, conns) = {
            let session = session.lock().await;
            session.announce_start();
            (session.id.clone(), seat_connections(&session))
        };
        self.attach(&conns, &id, now).await;
    }

    async fn play_move(&self, conn: ConnectionId, req: MoveRequest, now: DateTime<Utc>) {
        let id = SessionId::from_client(&req.session_id);
        let Some(session) = self.sessions.get(&id).await else {
            debug!(%conn, session = %id, "Move for unknown session");
            return;
        };
        let mut session = session.lock().await;
        match session.apply_move(conn, &req.from, &req.to, req.promotion.as_deref(), now) {
            Ok(_) if session.status() == SessionStatus::Finished => self.conclude(&mut session),
            Ok(_) => {}
            Err(e) => rejected(conn, &id, "move", &e),
        }
    }

    async fn resign(&self, conn: ConnectionId, req: ResignRequest, now: DateTime<Utc>) {
        let id = SessionId::from_client(&req.session_id);
        let Some(session) = self.sessions.get(&id).await else {
            return;
        };
        let mut session = session.lock().await;
        match session.resign(conn, req.username.as_deref(), now) {
            Ok(_) => self.conclude(&mut session),
            Err(e) => rejected(conn, &id, "resign", &e),
        }
    }

    async fn timeout(&self, conn: ConnectionId, req: TimeoutClaim, now: DateTime<Utc>) {
        let id = SessionId::from_client(&req.session_id);
        let Some(session) = self.sessions.get(&id).await else {
            return;
        };
        let verify = self.config.verify_timeouts.then_some(self.config.clock_tolerance);
        let mut session = session.lock().await;
        match session.claim_timeout(conn, req.winner, now, verify) {
            Ok(_) => self.conclude(&mut session),
            Err(e) => rejected(conn, &id, "timeout", &e),
        }
    }

    async fn chat(&self, conn: ConnectionId, req: ChatRequest) {
        let id = SessionId::from_client(&req.session_id);
        let Some(session) = self.sessions.get(&id).await else {
            return;
        };
        let session = session.lock().await;
        if !session.is_participant(conn) {
            debug!(%conn, session = %id, "Chat from non-participant dropped");
            return;
        }
        session.broadcast_except(
            conn,
            ServerMessage::ChatMessage {
                sender: req.sender,
                message: req.message,
            },
        );
    }

    async fn report(&self, participant: Participant, req: ReportRequest, now: DateTime<Utc>) {
        // with auth on, only a verified seeker may report, under its own name
        let reporter = if self.config.auth.is_configured() {
            self.clients
                .read()
                .await
                .get(&participant.connection_id)
                .and_then(|client| client.verified_username.clone())
        } else {
            req.reporter
        };
        let outcome = self
            .reports
            .file_report_at(
                reporter.as_deref().unwrap_or_default(),
                req.reported.as_deref().unwrap_or_default(),
                req.reason.as_deref().unwrap_or_default(),
                now,
            )
            .await;
        let message = outcome.message().to_string();
        participant.send(match outcome {
            ReportOutcome::Accepted { .. } => ServerMessage::ReportSuccess { message },
            ReportOutcome::AlreadyReported | ReportOutcome::InvalidInput => {
                ServerMessage::ReportError { message }
            }
        });
    }

    async fn create_room(&self, participant: Participant, req: CreateRoomRequest, now: DateTime<Utc>) {
        let profile = req.creator.into_profile();
        if !profile.has_username() {
            participant.send(ServerMessage::error(ErrorCode::InvalidInput, "Username required"));
            return;
        }
        if self.is_restricted(&participant, &profile.username, now).await {
            return;
        }

        let conn = participant.connection_id;
        let owner = participant.clone();
        let session = self
            .sessions
            .create_unique(
                || SessionId::room_code(&mut rand::thread_rng()),
                |id| GameSession::private_room(id, profile, owner, now),
            )
            .await;
        let code = session.lock().await.id.clone();
        info!(%conn, room = %code, "Private room created");
        participant.send(ServerMessage::RoomCreated { code: code.clone() });
        self.attach(&[conn], &code, now).await;
    }

    async fn join_room(&self, participant: Participant, req: JoinRoomRequest, now: DateTime<Utc>) {
        let profile = req.player.into_profile();
        if !profile.has_username() {
            participant.send(ServerMessage::error(ErrorCode::InvalidInput, "Username required"));
            return;
        }
        if self.is_restricted(&participant, &profile.username, now).await {
            return;
        }

        let code = SessionId::from_client(&req.code);
        let Some(session) = self.sessions.get(&code).await else {
            participant.send(ServerMessage::error(ErrorCode::RoomNotFound, "Room not found"));
            return;
        };

        let conn = participant.connection_id;
        let joined = session.lock().await.join(profile, participant.clone());
        match joined {
            Ok(()) => self.attach(&[conn], &code, now).await,
            Err(SessionError::AlreadyInSession) => {
                participant.send(ServerMessage::error(ErrorCode::InvalidInput, "Already in this room"));
            }
            Err(e) => {
                participant.send(ServerMessage::error(ErrorCode::RoomFull, e.to_string()));
            }
        }
    }

    async fn start_game(&self, participant: Participant, req: StartGameRequest, now: DateTime<Utc>) {
        let code = SessionId::from_client(&req.code);
        let Some(session) = self.sessions.get(&code).await else {
            participant.send(ServerMessage::error(ErrorCode::RoomNotFound, "Room not found"));
            return;
        };
        let conn = participant.connection_id;
        let started = session.lock().await.start(conn, req.mode, now);
        if let Err(e) = started {
            rejected(conn, &code, "start", &e);
        }
    }

    async fn local_game(&self, participant: Participant, req: LocalGameRequest, now: DateTime<Utc>) {
        let white = named_or(req.white.into_profile(), "White");
        let black = named_or(req.black.into_profile(), "Black");
        let conn = participant.connection_id;

        let session = self
            .sessions
            .create_unique(SessionId::quick, |id| {
                GameSession::local(id, white, black, participant, req.mode, now)
            })
            .await;
        let id = {
            let session = session.lock().await;
            session.announce_start();
            session.id.clone()
        };
        info!(%conn, session = %id, "Local game started");
        self.attach(&[conn], &id, now).await;
    }

    // ===== HELPERS =====

    /// Finalize a finished session and schedule its removal.
    fn conclude(&self, session: &mut GameSession) {
        let Some(record) = session.finalize() else {
            return;
        };
        self.finalizer.submit(record);

        let id = session.id.clone();
        let conns = seat_connections(session);
        let removal = self.sessions.schedule_removal(id.clone());
        let clients = Arc::clone(&self.clients);
        tokio::spawn(async move {
            if removal.await.is_ok() {
                unbind(&clients, &conns, &id).await;
            }
        });
    }

    /// Run the departure of `conn` against one session.
    async fn leave(&self, conn: ConnectionId, id: &SessionId, now: DateTime<Utc>) {
        let Some(session) = self.sessions.get(id).await else {
            return;
        };
        let abandoned = {
            let mut session = session.lock().await;
            match session.participant_left(conn, now) {
                Departure::Forfeited(_) => {
                    self.conclude(&mut session);
                    None
                }
                Departure::Abandoned => Some(seat_connections(&session)),
                Departure::AlreadyOver | Departure::NotParticipant => None,
            }
        };
        if let Some(conns) = abandoned {
            self.sessions.remove(id).await;
            unbind(&self.clients, &conns, id).await;
        }
    }

    /// Bind `conns` to a session, then treat any that already left as
    /// departures.
    async fn attach(&self, conns: &[ConnectionId], id: &SessionId, now: DateTime<Utc>) {
        for conn in self.bind(conns, id).await {
            info!(%conn, session = %id, "Participant left before the session was bound");
            self.leave(conn, id, now).await;
        }
    }

    async fn remember_identity(&self, conn: ConnectionId, username: &str) {
        if let Some(client) = self.clients.write().await.get_mut(&conn) {
            client.verified_username = Some(username.to_string());
        }
    }

    async fn participant(&self, conn: ConnectionId) -> Option<Participant> {
        self.clients
            .read()
            .await
            .get(&conn)
            .map(|client| client.participant.clone())
    }

    /// Returns the connections that are no longer registered.
    async fn bind(&self, conns: &[ConnectionId], id: &SessionId) -> Vec<ConnectionId> {
        let mut clients = self.clients.write().await;
        let mut departed = Vec::new();
        for conn in conns {
            match clients.get_mut(conn) {
                Some(client) => {
                    client.sessions.insert(id.clone());
                }
                None => departed.push(*conn),
            }
        }
        departed
    }

    async fn is_restricted(&self, participant: &Participant, username: &str, now: DateTime<Utc>) -> bool {
        let Some(until) = self.reports.restricted_until(username, now).await else {
            return false;
        };
        debug!(conn = %participant.connection_id, player = username, %until, "Restricted player refused");
        participant.send(ServerMessage::Error(ServerError {
            code: ErrorCode::Banned,
            message: format!("You are banned until {}", until.to_rfc3339()),
            until: Some(until),
        }));
        true
    }
}

async fn unbind(clients: &ClientRegistry, conns: &[ConnectionId], id: &SessionId) {
    let mut clients = clients.write().await;
    for conn in conns {
        if let Some(client) = clients.get_mut(conn) {
            client.sessions.remove(id);
        }
    }
}

fn seat_connections(session: &GameSession) -> Vec<ConnectionId> {
    let mut conns: Vec<ConnectionId> = crate::game::state::Color::ALL
        .iter()
        .filter_map(|c| session.seat_of(*c))
        .map(|seat| seat.participant.connection_id)
        .collect();
    conns.dedup();
    conns
}

fn named_or(mut profile: PlayerProfile, fallback: &str) -> PlayerProfile {
    if !profile.has_username() {
        profile.username = fallback.to_string();
    }
    profile
}

fn rejected(conn: ConnectionId, id: &SessionId, action: &str, error: &SessionError) {
    debug!(%conn, session = %id, action, error = %error, "Action rejected");
}
