//! Game Session Management
//!
//! One `GameSession` per game, each behind its own mutex so that every
//! event for a session is applied as a single critical section. The
//! `SessionManager` owns the table of live sessions and their deferred
//! removal.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::rating::{RatingChange, Score};
use crate::core::{ConnectionId, SessionId};
use crate::game::clock::GameClock;
use crate::game::rules::{Position, RulesError, Terminal};
use crate::game::state::{
    Color, EndReason, GameMode, GameResult, MatchKind, MoveRecord, PlayerProfile, SessionKind,
    SessionStatus,
};
use crate::network::protocol::{GameOverNotice, GameStart, MoveNotice, RoomReadyNotice, ServerMessage};
use crate::persist::record::MatchRecord;

/// Session shared between the store and event handlers.
pub type SharedSession = Arc<Mutex<GameSession>>;

/// Outbound handle of one connection.
#[derive(Debug, Clone)]
pub struct Participant {
    /// Connection this handle delivers to.
    pub connection_id: ConnectionId,
    sender: mpsc::Sender<ServerMessage>,
}

impl Participant {
    /// Wrap a connection's outbound channel.
    pub fn new(connection_id: ConnectionId, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            connection_id,
            sender,
        }
    }

    /// Deliver without waiting. A full channel drops the message.
    pub fn send(&self, message: ServerMessage) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(conn = %self.connection_id, "Outbound channel full, message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(conn = %self.connection_id, "Outbound channel closed");
                false
            }
        }
    }

    /// Whether the connection has gone away.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// One side of the board.
#[derive(Debug, Clone)]
pub struct Seat {
    /// Player seated here.
    pub profile: PlayerProfile,
    /// Color of this seat.
    pub color: Color,
    /// Connection controlling this seat.
    pub participant: Participant,
    /// False once the connection has left.
    pub present: bool,
}

/// Session errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Game is not in progress.
    #[error("Game not active")]
    NotActive,

    /// Caller does not control the side to move.
    #[error("Not your turn")]
    NotYourTurn,

    /// Rules adapter refused the move.
    #[error("Illegal move: {0}")]
    IllegalMove(#[from] RulesError),

    /// No free seat.
    #[error("Room is full")]
    RoomFull,

    /// Caller already holds a seat.
    #[error("Already in session")]
    AlreadyInSession,

    /// Second seat still empty.
    #[error("Room not ready")]
    NotReady,

    /// Game already started.
    #[error("Game already started")]
    AlreadyStarted,

    /// Caller holds no seat.
    #[error("Not a participant")]
    NotParticipant,

    /// Timeout claimed while the clock still has time.
    #[error("Clock has not expired")]
    ClockNotExpired,
}

/// What a participant leaving did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// Active game ended by the departure.
    Forfeited(GameResult),
    /// Unstarted room closed.
    Abandoned,
    /// Game was already over.
    AlreadyOver,
    /// Connection held no seat.
    NotParticipant,
}

/// A single game.
#[derive(Debug)]
pub struct GameSession {
    /// Unique identifier.
    pub id: SessionId,
    /// Quick-matched or private.
    pub kind: SessionKind,
    /// Match type recorded with the result.
    pub match_kind: MatchKind,
    /// Time control.
    pub mode: GameMode,
    /// Whether ratings are in play.
    pub rated: bool,
    status: SessionStatus,
    seats: [Option<Seat>; 2],
    position: Position,
    moves: Vec<MoveRecord>,
    clock: GameClock,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    result: Option<GameResult>,
}

impl GameSession {
    fn empty(
        id: SessionId,
        kind: SessionKind,
        match_kind: MatchKind,
        mode: GameMode,
        rated: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            match_kind,
            mode,
            rated,
            status: SessionStatus::WaitingForSecondPlayer,
            seats: [None, None],
            position: Position::new(),
            moves: Vec::new(),
            clock: GameClock::new(mode),
            created_at: now,
            started_at: None,
            ended_at: None,
            result: None,
        }
    }

    /// Active game between two queued players. `first` plays White.
    pub fn quick_match(
        id: SessionId,
        first: (PlayerProfile, Participant),
        second: (PlayerProfile, Participant),
        mode: GameMode,
        rated: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let mut session = Self::empty(id, SessionKind::QuickMatched, MatchKind::Online, mode, rated, now);
        session.seat(Color::White, first.0, first.1);
        session.seat(Color::Black, second.0, second.1);
        session.begin(now);
        session
    }

    /// Private room waiting for a second player. The creator plays White.
    pub fn private_room(
        id: SessionId,
        creator: PlayerProfile,
        participant: Participant,
        now: DateTime<Utc>,
    ) -> Self {
        let mut session = Self::empty(
            id,
            SessionKind::Private,
            MatchKind::Private,
            GameMode::default(),
            true,
            now,
        );
        session.seat(Color::White, creator, participant);
        session
    }

    /// Active hot-seat game; one connection plays both sides.
    pub fn local(
        id: SessionId,
        white: PlayerProfile,
        black: PlayerProfile,
        participant: Participant,
        mode: GameMode,
        now: DateTime<Utc>,
    ) -> Self {
        let mut session = Self::empty(id, SessionKind::Private, MatchKind::Local, mode, false, now);
        session.seat(Color::White, white, participant.clone());
        session.seat(Color::Black, black, participant);
        session.begin(now);
        session
    }

    fn seat(&mut self, color: Color, profile: PlayerProfile, participant: Participant) {
        self.seats[color.index()] = Some(Seat {
            profile,
            color,
            participant,
            present: true,
        });
    }

    fn begin(&mut self, now: DateTime<Utc>) {
        self.clock = GameClock::new(self.mode);
        self.clock.start(Color::White, now);
        self.started_at = Some(now);
        self.status = SessionStatus::Active;
    }

    // ===== ACCESSORS =====

    /// Lifecycle status.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Seat of `color`, if filled.
    pub fn seat_of(&self, color: Color) -> Option<&Seat> {
        self.seats[color.index()].as_ref()
    }

    /// Accepted moves in order.
    pub fn moves(&self) -> &[MoveRecord] {
        &self.moves
    }

    /// Result once the game has ended.
    pub fn result(&self) -> Option<GameResult> {
        self.result
    }

    /// Current position as FEN.
    pub fn fen(&self) -> String {
        self.position.fen()
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Server clock reading for `color`.
    pub fn time_left(&self, color: Color, now: DateTime<Utc>) -> TimeDelta {
        self.clock.remaining(color, now)
    }

    /// Colors controlled by `conn`.
    pub fn colors_of(&self, conn: ConnectionId) -> Vec<Color> {
        self.seats
            .iter()
            .flatten()
            .filter(|seat| seat.participant.connection_id == conn)
            .map(|seat| seat.color)
            .collect()
    }

    /// Whether `conn` holds a seat.
    pub fn is_participant(&self, conn: ConnectionId) -> bool {
        !self.colors_of(conn).is_empty()
    }

    /// One participant per distinct present connection.
    fn present_participants(&self) -> Vec<&Participant> {
        let mut seen: Vec<&Participant> = Vec::with_capacity(2);
        for seat in self.seats.iter().flatten().filter(|s| s.present) {
            if !seen.iter().any(|p| p.connection_id == seat.participant.connection_id) {
                seen.push(&seat.participant);
            }
        }
        seen
    }

    /// Send to every present participant once.
    pub fn broadcast(&self, message: ServerMessage) {
        for participant in self.present_participants() {
            participant.send(message.clone());
        }
    }

    /// Send to every present participant except `conn`.
    pub fn broadcast_except(&self, conn: ConnectionId, message: ServerMessage) {
        for participant in self.present_participants() {
            if participant.connection_id != conn {
                participant.send(message.clone());
            }
        }
    }

    fn profiles(&self) -> (PlayerProfile, PlayerProfile) {
        let profile = |color: Color| {
            self.seat_of(color)
                .map(|s| s.profile.clone())
                .unwrap_or_else(|| PlayerProfile::anonymous(""))
        };
        (profile(Color::White), profile(Color::Black))
    }

    /// Send `startGame` to each participant with its own color.
    pub fn announce_start(&self) {
        let (white, black) = self.profiles();
        for participant in self.present_participants() {
            let colors = self.colors_of(participant.connection_id);
            let color = match colors.as_slice() {
                [only] => Some(*only),
                _ => None,
            };
            participant.send(ServerMessage::StartGame(GameStart {
                session_id: self.id.clone(),
                white: white.clone(),
                black: black.clone(),
                mode: self.mode,
                clock_seconds: self.mode.clock_seconds(),
                rated: self.rated,
                color,
            }));
        }
    }

    // ===== TRANSITIONS =====

    /// Seat a second player in a waiting room.
    pub fn join(&mut self, profile: PlayerProfile, participant: Participant) -> Result<(), SessionError> {
        if self.status != SessionStatus::WaitingForSecondPlayer {
            return Err(SessionError::RoomFull);
        }
        if self.is_participant(participant.connection_id) {
            return Err(SessionError::AlreadyInSession);
        }

        self.seat(Color::Black, profile, participant);
        self.status = SessionStatus::Ready;

        let (white, black) = self.profiles();
        info!(session = %self.id, white = %white.username, black = %black.username, "Room ready");
        self.broadcast(ServerMessage::RoomReady(RoomReadyNotice {
            code: self.id.clone(),
            white,
            black,
        }));
        Ok(())
    }

    /// Start a ready room.
    pub fn start(&mut self, conn: ConnectionId, mode: GameMode, now: DateTime<Utc>) -> Result<(), SessionError> {
        if !self.is_participant(conn) {
            return Err(SessionError::NotParticipant);
        }
        match self.status {
            SessionStatus::Ready => {}
            SessionStatus::WaitingForSecondPlayer => return Err(SessionError::NotReady),
            _ => return Err(SessionError::AlreadyStarted),
        }

        self.mode = mode;
        self.begin(now);
        info!(session = %self.id, ?mode, "Game started");
        self.announce_start();
        Ok(())
    }

    /// Validate and apply a move from `conn`.
    pub fn apply_move(
        &mut self,
        conn: ConnectionId,
        from: &str,
        to: &str,
        promotion: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<MoveRecord, SessionError> {
        if self.status != SessionStatus::Active {
            return Err(SessionError::NotActive);
        }
        let turn = self.position.turn();
        let controls_turn = self
            .seat_of(turn)
            .map(|seat| seat.participant.connection_id == conn)
            .unwrap_or(false);
        if !controls_turn {
            return Err(if self.is_participant(conn) {
                SessionError::NotYourTurn
            } else {
                SessionError::NotParticipant
            });
        }

        let applied = self.position.apply_move(from, to, promotion)?;
        let record = MoveRecord {
            number: self.moves.len() as u32 + 1,
            color: applied.color,
            from: applied.from,
            to: applied.to,
            promotion: applied.promotion,
            notation: applied.notation,
            fen_after: applied.fen_after,
            position_hash: applied.position_hash,
        };
        self.moves.push(record.clone());
        self.clock.press(now);

        if let Some(opponent) = self.seat_of(turn.opposite()) {
            if opponent.present && opponent.participant.connection_id != conn {
                opponent.participant.send(ServerMessage::OpponentMove(MoveNotice {
                    session_id: self.id.clone(),
                    color: record.color,
                    from: record.from.clone(),
                    to: record.to.clone(),
                    promotion: record.promotion,
                    notation: record.notation.clone(),
                    fen: record.fen_after.clone(),
                }));
            }
        }

        if let Some(terminal) = self.position.terminal() {
            let result = match terminal {
                Terminal::Checkmate { winner } => GameResult::win(winner, EndReason::Checkmate),
                Terminal::Stalemate => GameResult::draw(EndReason::Stalemate),
                Terminal::ThreefoldRepetition => GameResult::draw(EndReason::ThreefoldRepetition),
                Terminal::InsufficientMaterial => GameResult::draw(EndReason::InsufficientMaterial),
                Terminal::FiftyMoveRule => GameResult::draw(EndReason::FiftyMoveRule),
            };
            self.finish(result, now);
        }

        Ok(record)
    }

    /// Resign the caller's seat.
    ///
    /// When the connection holds both seats, `username` picks the seat,
    /// falling back to the side to move.
    pub fn resign(
        &mut self,
        conn: ConnectionId,
        username: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<GameResult, SessionError> {
        if self.status != SessionStatus::Active {
            return Err(SessionError::NotActive);
        }
        let colors = self.colors_of(conn);
        let resigning = match colors.as_slice() {
            [] => return Err(SessionError::NotParticipant),
            [only] => *only,
            _ => username
                .and_then(|name| {
                    colors.iter().copied().find(|c| {
                        self.seat_of(*c)
                            .map(|s| s.profile.username == name)
                            .unwrap_or(false)
                    })
                })
                .unwrap_or_else(|| self.position.turn()),
        };

        let result = GameResult::win(resigning.opposite(), EndReason::Resignation);
        self.finish(result, now);
        Ok(result)
    }

    /// Accept a claim that `winner`'s opponent ran out of time.
    ///
    /// With `verify` set, the claim only stands if the server clock of the
    /// losing side is within that tolerance of zero.
    pub fn claim_timeout(
        &mut self,
        conn: ConnectionId,
        winner: Color,
        now: DateTime<Utc>,
        verify: Option<TimeDelta>,
    ) -> Result<GameResult, SessionError> {
        if self.status != SessionStatus::Active {
            return Err(SessionError::NotActive);
        }
        if !self.is_participant(conn) {
            return Err(SessionError::NotParticipant);
        }
        if let Some(tolerance) = verify {
            if !self.clock.has_flagged(winner.opposite(), now, tolerance) {
                return Err(SessionError::ClockNotExpired);
            }
        }

        let result = GameResult::win(winner, EndReason::Timeout);
        self.finish(result, now);
        Ok(result)
    }

    /// Handle `conn` leaving.
    pub fn participant_left(&mut self, conn: ConnectionId, now: DateTime<Utc>) -> Departure {
        let mut held_seat = false;
        for seat in self.seats.iter_mut().flatten() {
            if seat.participant.connection_id == conn {
                seat.present = false;
                held_seat = true;
            }
        }
        if !held_seat {
            return Departure::NotParticipant;
        }

        match self.status {
            SessionStatus::WaitingForSecondPlayer | SessionStatus::Ready => {
                self.status = SessionStatus::Finalized;
                info!(session = %self.id, "Room abandoned before start");
                self.broadcast(ServerMessage::RoomClosed { code: self.id.clone() });
                Departure::Abandoned
            }
            SessionStatus::Active => {
                let remaining = self
                    .seats
                    .iter()
                    .flatten()
                    .find(|seat| seat.present)
                    .map(|seat| seat.color);
                let result = match remaining {
                    Some(color) => GameResult::win(color, EndReason::Disconnect),
                    None => GameResult::draw(EndReason::Disconnect),
                };
                self.finish(result, now);
                Departure::Forfeited(result)
            }
            SessionStatus::Finished | SessionStatus::Finalized => Departure::AlreadyOver,
        }
    }

    fn finish(&mut self, result: GameResult, now: DateTime<Utc>) {
        self.status = SessionStatus::Finished;
        self.ended_at = Some(now);
        self.clock.stop(now);
        self.result = Some(result);

        let winner = result
            .winner
            .and_then(|c| self.seat_of(c))
            .map(|s| s.profile.username.clone());
        info!(
            session = %self.id,
            winner = winner.as_deref().unwrap_or("draw"),
            reason = result.reason.as_str(),
            moves = self.moves.len(),
            "Game over"
        );

        self.broadcast(ServerMessage::GameOver(GameOverNotice {
            session_id: self.id.clone(),
            winner,
            winner_color: result.winner,
            reason: result.reason,
            final_position: self.position.fen(),
            moves: self.moves.iter().map(|m| m.notation.clone()).collect(),
        }));
    }

    /// Produce the match record, exactly once, after the game has finished.
    pub fn finalize(&mut self) -> Option<MatchRecord> {
        if self.status != SessionStatus::Finished {
            return None;
        }
        let result = self.result?;
        let (white, black) = self.profiles();

        let ratings = match (white.rating, black.rating) {
            (Some(white_rating), Some(black_rating))
                if self.rated && self.match_kind.affects_standings() =>
            {
                let score = match result.winner {
                    Some(Color::White) => Score::Win,
                    Some(Color::Black) => Score::Loss,
                    None => Score::Draw,
                };
                Some(RatingChange::compute(white_rating, black_rating, score))
            }
            _ => None,
        };

        self.status = SessionStatus::Finalized;
        info!(session = %self.id, rated = ratings.is_some(), "Session finalized");

        Some(MatchRecord {
            session_id: self.id.clone(),
            match_kind: self.match_kind,
            mode: self.mode,
            rated: ratings.is_some(),
            white,
            black,
            winner: result.winner,
            reason: result.reason,
            started_at: self.started_at,
            ended_at: self.ended_at.unwrap_or(self.created_at),
            final_fen: self.position.fen(),
            ratings,
            moves: self.moves.clone(),
        })
    }
}

// ===== SESSION STORE =====

/// Table of live sessions.
pub struct SessionManager {
    sessions: RwLock<BTreeMap<SessionId, SharedSession>>,
    grace_period: Duration,
}

impl SessionManager {
    /// Store whose finished sessions linger for `grace_period`.
    pub fn new(grace_period: Duration) -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            grace_period,
        }
    }

    /// Delay between finalization and removal.
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Register a session under a fresh id.
    ///
    /// `next_id` is called until it yields an id not already in use; the
    /// check and the insert happen under one write lock.
    pub async fn create_unique<F, B>(&self, mut next_id: F, build: B) -> SharedSession
    where
        F: FnMut() -> SessionId,
        B: FnOnce(SessionId) -> GameSession,
    {
        let mut sessions = self.sessions.write().await;
        let id = loop {
            let candidate = next_id();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
            debug!(id = %candidate, "Session id collision, regenerating");
        };

        let session = Arc::new(Mutex::new(build(id.clone())));
        sessions.insert(id.clone(), session.clone());
        debug!(session = %id, total = sessions.len(), "Session registered");
        session
    }

    /// Look up a session.
    pub async fn get(&self, id: &SessionId) -> Option<SharedSession> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Remove a session now.
    pub async fn remove(&self, id: &SessionId) -> Option<SharedSession> {
        let removed = self.sessions.write().await.remove(id);
        if removed.is_some() {
            debug!(session = %id, "Session removed");
        }
        removed
    }

    /// Remove a session once the grace period has passed.
    pub fn schedule_removal(self: &Arc<Self>, id: SessionId) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(store.grace_period).await;
            store.remove(&id).await;
        })
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
