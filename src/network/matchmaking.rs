//! Matchmaking Queue
//!
//! One FIFO per game mode. The first waiting seeker plays White against
//! the next arrival. Entries are in memory only; seekers re-queue after a
//! restart.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::session::{GameSession, Participant, SessionManager, SharedSession};
use crate::core::{ConnectionId, SessionId};
use crate::game::state::{GameMode, PlayerProfile};

/// A matchmaking request.
#[derive(Debug, Clone)]
pub struct Seeker {
    /// Who is seeking.
    pub profile: PlayerProfile,
    /// Requested mode.
    pub mode: GameMode,
    /// Whether the seeker wants a rated game.
    pub rated: bool,
    /// Where to deliver the result.
    pub participant: Participant,
}

/// A seeker waiting for an opponent.
#[derive(Debug, Clone)]
pub struct WaitingEntry {
    /// The original request.
    pub seeker: Seeker,
    /// When the seeker joined the queue.
    pub queued_at: DateTime<Utc>,
}

/// Result of a matchmaking request.
pub enum MatchOutcome {
    /// Paired; the session is registered and active.
    Matched(SharedSession),
    /// Queued (or already queued).
    Waiting,
}

/// Per-mode waiting queues.
#[derive(Default)]
pub struct MatchmakingQueue {
    queues: Mutex<BTreeMap<GameMode, VecDeque<WaitingEntry>>>,
}

impl MatchmakingQueue {
    /// Empty queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair `seeker` with the earliest waiting entry of its mode, or queue it.
    ///
    /// Returns `None` for a seeker without a player id or username. The
    /// queue lock is held until the new session is registered in `sessions`,
    /// so an entry is never handed to two sessions.
    pub async fn enqueue_or_match(
        &self,
        sessions: &SessionManager,
        seeker: Seeker,
        now: DateTime<Utc>,
    ) -> Option<MatchOutcome> {
        if !seeker.profile.has_identity() {
            debug!(conn = %seeker.participant.connection_id, "Seeker without identity ignored");
            return None;
        }

        let mut queues = self.queues.lock().await;
        let queue = queues.entry(seeker.mode).or_default();
        queue.retain(|entry| !entry.seeker.participant.is_closed());

        let already_waiting = queue.iter().any(|entry| {
            entry.seeker.participant.connection_id == seeker.participant.connection_id
                || entry.seeker.profile.player_id == seeker.profile.player_id
        });
        if already_waiting {
            debug!(player = %seeker.profile.username, "Seeker already waiting");
            return Some(MatchOutcome::Waiting);
        }

        let Some(waiting) = queue.pop_front() else {
            info!(player = %seeker.profile.username, mode = ?seeker.mode, "Seeker queued");
            queue.push_back(WaitingEntry {
                seeker,
                queued_at: now,
            });
            return Some(MatchOutcome::Waiting);
        };

        let white = waiting.seeker;
        let mode = seeker.mode;
        let rated = white.rated && seeker.rated;
        let white_name = white.profile.username.clone();
        let black_name = seeker.profile.username.clone();

        let session = sessions
            .create_unique(SessionId::quick, |id| {
                GameSession::quick_match(
                    id,
                    (white.profile, white.participant),
                    (seeker.profile, seeker.participant),
                    mode,
                    rated,
                    now,
                )
            })
            .await;
        drop(queues);

        info!(
            white = %white_name,
            black = %black_name,
            ?mode,
            rated,
            waited_ms = (now - waiting.queued_at).num_milliseconds(),
            "Players paired"
        );
        Some(MatchOutcome::Matched(session))
    }

    /// Remove `conn` from every queue. Returns the number of entries removed.
    pub async fn remove_connection(&self, conn: ConnectionId) -> usize {
        let mut queues = self.queues.lock().await;
        let mut removed = 0;
        for queue in queues.values_mut() {
            let before = queue.len();
            queue.retain(|entry| entry.seeker.participant.connection_id != conn);
            removed += before - queue.len();
        }
        if removed > 0 {
            debug!(%conn, removed, "Left matchmaking");
        }
        removed
    }

    /// Waiting entries for one mode.
    pub async fn queue_len(&self, mode: GameMode) -> usize {
        self.queues.lock().await.get(&mode).map(VecDeque::len).unwrap_or(0)
    }

    /// Waiting entries across all modes.
    pub async fn total_len(&self) -> usize {
        self.queues.lock().await.values().map(VecDeque::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{Color, SessionStatus};
    use crate::network::protocol::ServerMessage;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn seeker(id: &str, mode: GameMode) -> (Seeker, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(16);
        let seeker = Seeker {
            profile: PlayerProfile::new(id, id, Some(1200)),
            mode,
            rated: true,
            participant: Participant::new(ConnectionId::next(), tx),
        };
        (seeker, rx)
    }

    fn store() -> SessionManager {
        SessionManager::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_first_waits_second_matches() {
        let queue = MatchmakingQueue::new();
        let sessions = store();
        let (a, _rx_a) = seeker("alice", GameMode::Blitz);
        let (b, _rx_b) = seeker("bob", GameMode::Blitz);

        assert!(matches!(
            queue.enqueue_or_match(&sessions, a, Utc::now()).await,
            Some(MatchOutcome::Waiting)
        ));
        assert_eq!(queue.queue_len(GameMode::Blitz).await, 1);

        let Some(MatchOutcome::Matched(session)) = queue.enqueue_or_match(&sessions, b, Utc::now()).await else {
            panic!("expected a match");
        };
        assert_eq!(queue.queue_len(GameMode::Blitz).await, 0);
        assert_eq!(sessions.session_count().await, 1);

        let session = session.lock().await;
        assert_eq!(session.status(), SessionStatus::Active);
        assert_eq!(session.seat_of(Color::White).unwrap().profile.username, "alice");
        assert_eq!(session.seat_of(Color::Black).unwrap().profile.username, "bob");
        assert!(session.rated);
    }

    #[tokio::test]
    async fn test_modes_do_not_mix() {
        let queue = MatchmakingQueue::new();
        let sessions = store();
        let (a, _rx_a) = seeker("alice", GameMode::Blitz);
        let (b, _rx_b) = seeker("bob", GameMode::Bullet);

        queue.enqueue_or_match(&sessions, a, Utc::now()).await;
        queue.enqueue_or_match(&sessions, b, Utc::now()).await;
        assert_eq!(queue.total_len().await, 2);
        assert_eq!(sessions.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_identity_ignored() {
        let queue = MatchmakingQueue::new();
        let sessions = store();
        let (mut a, _rx) = seeker("alice", GameMode::Classic);
        a.profile.player_id = None;

        assert!(queue.enqueue_or_match(&sessions, a, Utc::now()).await.is_none());
        assert_eq!(queue.total_len().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_seek_not_queued_twice() {
        let queue = MatchmakingQueue::new();
        let sessions = store();
        let (a, _rx) = seeker("alice", GameMode::Classic);

        queue.enqueue_or_match(&sessions, a.clone(), Utc::now()).await;
        assert!(matches!(
            queue.enqueue_or_match(&sessions, a, Utc::now()).await,
            Some(MatchOutcome::Waiting)
        ));
        assert_eq!(queue.queue_len(GameMode::Classic).await, 1);
        assert_eq!(sessions.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_closed_entries_skipped() {
        let queue = MatchmakingQueue::new();
        let sessions = store();
        let (a, rx_a) = seeker("alice", GameMode::Classic);
        let (b, _rx_b) = seeker("bob", GameMode::Classic);

        queue.enqueue_or_match(&sessions, a, Utc::now()).await;
        drop(rx_a);
        assert!(matches!(
            queue.enqueue_or_match(&sessions, b, Utc::now()).await,
            Some(MatchOutcome::Waiting)
        ));
        assert_eq!(queue.queue_len(GameMode::Classic).await, 1);
    }

    #[tokio::test]
    async fn test_remove_connection() {
        let queue = MatchmakingQueue::new();
        let sessions = store();
        let (a, _rx) = seeker("alice", GameMode::Bullet);
        let conn = a.participant.connection_id;

        queue.enqueue_or_match(&sessions, a, Utc::now()).await;
        assert_eq!(queue.remove_connection(conn).await, 1);
        assert_eq!(queue.remove_connection(conn).await, 0);
        assert_eq!(queue.total_len().await, 0);
    }

    #[tokio::test]
    async fn test_unrated_seeker_makes_unrated_game() {
        let queue = MatchmakingQueue::new();
        let sessions = store();
        let (a, _rx_a) = seeker("alice", GameMode::Blitz);
        let (mut b, _rx_b) = seeker("bob", GameMode::Blitz);
        b.rated = false;

        queue.enqueue_or_match(&sessions, a, Utc::now()).await;
        let Some(MatchOutcome::Matched(session)) = queue.enqueue_or_match(&sessions, b, Utc::now()).await else {
            panic!("expected a match");
        };
        assert!(!session.lock().await.rated);
    }
}
