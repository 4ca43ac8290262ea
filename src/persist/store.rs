//! Match Store
//!
//! Persistence collaborator for finalized games. The server only writes;
//! history and leaderboard queries belong to whatever reads the store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use super::record::{MatchId, MatchRecord, PlayerOutcome, PlayerStats};
use crate::game::state::MoveRecord;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying file or device failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Store refused the write.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Write side of match persistence.
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Insert the match row and return its id.
    async fn record_match(&self, record: &MatchRecord) -> Result<MatchId, StoreError>;

    /// Insert the move log of a recorded match.
    async fn record_moves(&self, match_id: MatchId, moves: &[MoveRecord]) -> Result<(), StoreError>;

    /// Fold one game outcome into a player's statistics.
    async fn update_player_stats(
        &self,
        player_id: &str,
        outcome: PlayerOutcome,
    ) -> Result<(), StoreError>;

    /// Overwrite a player's rating.
    async fn update_rating(&self, player_id: &str, rating: i32) -> Result<(), StoreError>;
}

// ===== IN-MEMORY STORE =====

#[derive(Debug, Default)]
struct MemoryState {
    matches: Vec<(MatchId, MatchRecord)>,
    moves: BTreeMap<MatchId, Vec<MoveRecord>>,
    stats: BTreeMap<String, PlayerStats>,
    ratings: BTreeMap<String, i32>,
}

/// Store holding everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryMatchStore {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

impl MemoryMatchStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of recorded matches.
    pub async fn match_count(&self) -> usize {
        self.state.lock().await.matches.len()
    }

    /// All recorded matches in insertion order.
    pub async fn matches(&self) -> Vec<MatchRecord> {
        self.state
            .lock()
            .await
            .matches
            .iter()
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Moves recorded for a match.
    pub async fn moves(&self, match_id: MatchId) -> Vec<MoveRecord> {
        self.state
            .lock()
            .await
            .moves
            .get(&match_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Statistics of a player (zeroes if unknown).
    pub async fn stats(&self, player_id: &str) -> PlayerStats {
        self.state
            .lock()
            .await
            .stats
            .get(player_id)
            .copied()
            .unwrap_or_default()
    }

    /// Stored rating of a player.
    pub async fn rating(&self, player_id: &str) -> Option<i32> {
        self.state.lock().await.ratings.get(player_id).copied()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MatchStore for MemoryMatchStore {
    async fn record_match(&self, record: &MatchRecord) -> Result<MatchId, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let id = MatchId(state.matches.len() as u64 + 1);
        state.matches.push((id, record.clone()));
        Ok(id)
    }

    async fn record_moves(&self, match_id: MatchId, moves: &[MoveRecord]) -> Result<(), StoreError> {
        self.check_available()?;
        self.state
            .lock()
            .await
            .moves
            .entry(match_id)
            .or_default()
            .extend_from_slice(moves);
        Ok(())
    }

    async fn update_player_stats(
        &self,
        player_id: &str,
        outcome: PlayerOutcome,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        self.state
            .lock()
            .await
            .stats
            .entry(player_id.to_string())
            .or_default()
            .apply(outcome);
        Ok(())
    }

    async fn update_rating(&self, player_id: &str, rating: i32) -> Result<(), StoreError> {
        self.check_available()?;
        self.state
            .lock()
            .await
            .ratings
            .insert(player_id.to_string(), rating);
        Ok(())
    }
}

// ===== JSON LINES STORE =====

/// One line of the journal file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalEntry {
    /// Match row.
    Match {
        /// Assigned id.
        id: MatchId,
        /// Match data (moves excluded).
        record: MatchRecord,
    },
    /// Move log of a match.
    Moves {
        /// Match the moves belong to.
        id: MatchId,
        /// Moves in order.
        moves: Vec<MoveRecord>,
    },
    /// Statistics increment.
    Stats {
        /// Player.
        player_id: String,
        /// Outcome folded in.
        outcome: PlayerOutcome,
    },
    /// Rating overwrite.
    Rating {
        /// Player.
        player_id: String,
        /// New rating.
        rating: i32,
    },
}

/// Append-only journal of JSON lines.
pub struct JsonLinesMatchStore {
    path: PathBuf,
    file: Mutex<File>,
    next_id: AtomicU64,
}

impl JsonLinesMatchStore {
    /// Open (or create) a journal, continuing its match numbering.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut last_id = 0;

        if let Ok(existing) = File::open(&path).await {
            let mut lines = BufReader::new(existing).lines();
            while let Some(line) = lines.next_line().await? {
                if let Ok(JournalEntry::Match { id, .. }) = serde_json::from_str(&line) {
                    last_id = last_id.max(id.0);
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            next_id: AtomicU64::new(last_id + 1),
        })
    }

    /// Journal location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl MatchStore for JsonLinesMatchStore {
    async fn record_match(&self, record: &MatchRecord) -> Result<MatchId, StoreError> {
        let id = MatchId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.append(&JournalEntry::Match {
            id,
            record: record.clone(),
        })
        .await?;
        Ok(id)
    }

    async fn record_moves(&self, match_id: MatchId, moves: &[MoveRecord]) -> Result<(), StoreError> {
        self.append(&JournalEntry::Moves {
            id: match_id,
            moves: moves.to_vec(),
        })
        .await
    }

    async fn update_player_stats(
        &self,
        player_id: &str,
        outcome: PlayerOutcome,
    ) -> Result<(), StoreError> {
        self.append(&JournalEntry::Stats {
            player_id: player_id.to_string(),
            outcome,
        })
        .await
    }

    async fn update_rating(&self, player_id: &str, rating: i32) -> Result<(), StoreError> {
        self.append(&JournalEntry::Rating {
            player_id: player_id.to_string(),
            rating,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SessionId;
    use crate::game::state::{Color, EndReason, GameMode, MatchKind, PlayerProfile};
    use chrono::Utc;

    fn sample_record() -> MatchRecord {
        MatchRecord {
            session_id: SessionId::from_client("abc123"),
            match_kind: MatchKind::Online,
            mode: GameMode::Blitz,
            rated: true,
            white: PlayerProfile::new("w", "white", Some(1200)),
            black: PlayerProfile::new("b", "black", Some(1200)),
            winner: Some(Color::White),
            reason: EndReason::Resignation,
            started_at: None,
            ended_at: Utc::now(),
            final_fen: "8/8/8/8/8/8/8/8 w - - 0 1".to_string(),
            ratings: None,
            moves: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_records() {
        let store = MemoryMatchStore::new();
        let id = store.record_match(&sample_record()).await.unwrap();
        assert_eq!(id, MatchId(1));
        store.update_player_stats("w", PlayerOutcome::Win).await.unwrap();
        store.update_rating("w", 1216).await.unwrap();

        assert_eq!(store.match_count().await, 1);
        assert_eq!(store.stats("w").await.wins, 1);
        assert_eq!(store.rating("w").await, Some(1216));
        assert_eq!(store.stats("nobody").await, PlayerStats::default());
    }

    #[tokio::test]
    async fn test_memory_store_unavailable() {
        let store = MemoryMatchStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.record_match(&sample_record()).await,
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(store.match_count().await, 0);
    }

    #[tokio::test]
    async fn test_journal_continues_numbering() {
        let path = std::env::temp_dir().join(format!("gambit-journal-{}.jsonl", uuid::Uuid::new_v4()));

        let store = JsonLinesMatchStore::open(&path).await.unwrap();
        assert_eq!(store.record_match(&sample_record()).await.unwrap(), MatchId(1));
        store.update_player_stats("w", PlayerOutcome::Win).await.unwrap();
        drop(store);

        let reopened = JsonLinesMatchStore::open(&path).await.unwrap();
        assert_eq!(reopened.record_match(&sample_record()).await.unwrap(), MatchId(2));

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 3);
        assert!(contents.contains("\"op\":\"stats\""));

        let _ = tokio::fs::remove_file(&path).await;
    }
}
