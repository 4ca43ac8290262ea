//! Match Records
//!
//! Durable outcome of a finalized session, plus per-player statistics.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::rating::RatingChange;
use crate::core::SessionId;
use crate::game::state::{Color, EndReason, GameMode, MatchKind, MoveRecord, PlayerProfile};

/// Identifier assigned by the store to a recorded match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(pub u64);

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "match#{}", self.0)
    }
}

/// Result of a game from one player's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerOutcome {
    /// Player won.
    Win,
    /// Player lost.
    Loss,
    /// Game drawn.
    Draw,
}

/// Everything persisted about one finished game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    /// Session the game was played in.
    pub session_id: SessionId,
    /// Online, private or local.
    pub match_kind: MatchKind,
    /// Time control.
    pub mode: GameMode,
    /// Whether ratings were in play.
    pub rated: bool,
    /// White seat.
    pub white: PlayerProfile,
    /// Black seat.
    pub black: PlayerProfile,
    /// Winning side, `None` for a draw.
    pub winner: Option<Color>,
    /// Why the game ended.
    pub reason: EndReason,
    /// Game start.
    pub started_at: Option<DateTime<Utc>>,
    /// Game end.
    pub ended_at: DateTime<Utc>,
    /// Final position.
    pub final_fen: String,
    /// Rating change (white as A, black as B) when ratings were applied.
    pub ratings: Option<RatingChange>,
    /// Accepted moves in order; written separately from the match row.
    #[serde(skip)]
    pub moves: Vec<MoveRecord>,
}

impl MatchRecord {
    /// Profile seated at `color`.
    pub fn player(&self, color: Color) -> &PlayerProfile {
        match color {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }

    /// Outcome for the player at `color`.
    pub fn outcome_for(&self, color: Color) -> PlayerOutcome {
        match self.winner {
            None => PlayerOutcome::Draw,
            Some(winner) if winner == color => PlayerOutcome::Win,
            Some(_) => PlayerOutcome::Loss,
        }
    }

    /// Username of the winner, if any.
    pub fn winner_username(&self) -> Option<&str> {
        self.winner.map(|c| self.player(c).username.as_str())
    }

    /// New rating for `color`, when ratings were applied.
    pub fn new_rating(&self, color: Color) -> Option<i32> {
        self.ratings.map(|r| match color {
            Color::White => r.new_a,
            Color::Black => r.new_b,
        })
    }
}

/// Aggregate statistics for one player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStats {
    /// Games won.
    pub wins: u32,
    /// Games lost.
    pub losses: u32,
    /// Games drawn.
    pub draws: u32,
    /// All games.
    pub total_games: u32,
    /// Consecutive wins; a loss resets it, a draw keeps it.
    pub current_streak: u32,
}

impl PlayerStats {
    /// Fold one outcome in.
    pub fn apply(&mut self, outcome: PlayerOutcome) {
        self.total_games += 1;
        match outcome {
            PlayerOutcome::Win => {
                self.wins += 1;
                self.current_streak += 1;
            }
            PlayerOutcome::Loss => {
                self.losses += 1;
                self.current_streak = 0;
            }
            PlayerOutcome::Draw => self.draws += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streak_rules() {
        let mut stats = PlayerStats::default();
        stats.apply(PlayerOutcome::Win);
        stats.apply(PlayerOutcome::Win);
        stats.apply(PlayerOutcome::Draw);
        assert_eq!(stats.current_streak, 2);
        stats.apply(PlayerOutcome::Loss);
        assert_eq!(stats.current_streak, 0);
        assert_eq!(stats.total_games, 4);
        assert_eq!((stats.wins, stats.losses, stats.draws), (2, 1, 1));
    }
}
