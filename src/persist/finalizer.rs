//! Finalizer
//!
//! Background worker that writes finalized matches. Sessions only enqueue;
//! the worker owns every await on the store so a slow or failing store
//! never holds up a game-over broadcast.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::record::{MatchId, MatchRecord};
use super::store::MatchStore;
use crate::game::state::Color;

/// Handle for submitting finalized matches.
#[derive(Clone)]
pub struct Finalizer {
    tx: mpsc::UnboundedSender<MatchRecord>,
}

impl Finalizer {
    /// Start the worker over `store`.
    ///
    /// The worker exits once every `Finalizer` clone is dropped and the
    /// queue is drained.
    pub fn spawn(store: Arc<dyn MatchStore>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<MatchRecord>();

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                persist(store.as_ref(), &record).await;
            }
            debug!("Finalizer queue closed");
        });

        (Self { tx }, handle)
    }

    /// Queue a record for persistence. Returns false if the worker is gone.
    pub fn submit(&self, record: MatchRecord) -> bool {
        let session_id = record.session_id.clone();
        match self.tx.send(record) {
            Ok(()) => true,
            Err(_) => {
                error!(session = %session_id, "Finalizer worker stopped, match not persisted");
                false
            }
        }
    }
}

/// Write one record: match row, then moves, stats and ratings.
///
/// A failed match row stops the pipeline. Later steps are independent and
/// their failures are only logged.
pub async fn persist(store: &dyn MatchStore, record: &MatchRecord) -> Option<MatchId> {
    let match_id = match store.record_match(record).await {
        Ok(id) => id,
        Err(e) => {
            error!(session = %record.session_id, error = %e, "Failed to record match");
            return None;
        }
    };

    if !record.moves.is_empty() {
        if let Err(e) = store.record_moves(match_id, &record.moves).await {
            warn!(%match_id, error = %e, "Failed to record moves");
        }
    }

    if record.match_kind.affects_standings() {
        for color in Color::ALL {
            let Some(player_id) = record.player(color).player_id.as_deref() else {
                continue;
            };
            if let Err(e) = store
                .update_player_stats(player_id, record.outcome_for(color))
                .await
            {
                warn!(%match_id, player = player_id, error = %e, "Failed to update stats");
            }
        }
    }

    if record.ratings.is_some() {
        for color in Color::ALL {
            let (Some(player_id), Some(rating)) = (
                record.player(color).player_id.as_deref(),
                record.new_rating(color),
            ) else {
                continue;
            };
            if let Err(e) = store.update_rating(player_id, rating).await {
                warn!(%match_id, player = player_id, error = %e, "Failed to update rating");
            }
        }
    }

    info!(
        %match_id,
        session = %record.session_id,
        winner = record.winner_username().unwrap_or("draw"),
        reason = record.reason.as_str(),
        "Match persisted"
    );
    Some(match_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rating::{RatingChange, Score};
    use crate::core::SessionId;
    use crate::game::state::{EndReason, GameMode, MatchKind, PlayerProfile};
    use crate::persist::record::PlayerOutcome;
    use crate::persist::store::MemoryMatchStore;
    use chrono::Utc;

    fn record(kind: MatchKind, ratings: Option<RatingChange>) -> MatchRecord {
        MatchRecord {
            session_id: SessionId::from_client("ROOM1"),
            match_kind: kind,
            mode: GameMode::Classic,
            rated: ratings.is_some(),
            white: PlayerProfile::new("w", "alice", Some(1200)),
            black: PlayerProfile::new("b", "bob", Some(1200)),
            winner: Some(Color::White),
            reason: EndReason::Checkmate,
            started_at: None,
            ended_at: Utc::now(),
            final_fen: String::new(),
            ratings,
            moves: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_persist_online_match() {
        let store = MemoryMatchStore::new();
        let change = RatingChange::compute(1200, 1200, Score::Win);
        let id = persist(&store, &record(MatchKind::Online, Some(change))).await;

        assert!(id.is_some());
        assert_eq!(store.stats("w").await.wins, 1);
        assert_eq!(store.stats("b").await.losses, 1);
        assert_eq!(store.rating("w").await, Some(1216));
        assert_eq!(store.rating("b").await, Some(1184));
    }

    #[tokio::test]
    async fn test_local_match_skips_standings() {
        let store = MemoryMatchStore::new();
        persist(&store, &record(MatchKind::Local, None)).await;

        assert_eq!(store.match_count().await, 1);
        assert_eq!(store.stats("w").await.total_games, 0);
        assert_eq!(store.rating("w").await, None);
    }

    #[tokio::test]
    async fn test_failed_match_row_stops_pipeline() {
        let store = MemoryMatchStore::new();
        store.set_unavailable(true);
        assert_eq!(persist(&store, &record(MatchKind::Online, None)).await, None);
        store.set_unavailable(false);
        assert_eq!(store.stats("w").await.total_games, 0);
    }

    #[tokio::test]
    async fn test_worker_drains_queue() {
        let store = Arc::new(MemoryMatchStore::new());
        let (finalizer, handle) = Finalizer::spawn(store.clone());
        assert!(finalizer.submit(record(MatchKind::Private, None)));
        assert!(finalizer.submit(record(MatchKind::Private, None)));
        drop(finalizer);
        handle.await.unwrap();

        assert_eq!(store.match_count().await, 2);
        assert_eq!(store.stats("b").await, {
            let mut s = crate::persist::record::PlayerStats::default();
            s.apply(PlayerOutcome::Loss);
            s.apply(PlayerOutcome::Loss);
            s
        });
    }
}
