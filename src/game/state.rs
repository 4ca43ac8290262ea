//! Session State Types
//!
//! Colors, modes, lifecycle status, player profiles and the move log.

use serde::{Deserialize, Serialize};

/// Side of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    /// Moves first.
    White,
    /// Moves second.
    Black,
}

impl Color {
    /// Both colors in seat order.
    pub const ALL: [Color; 2] = [Color::White, Color::Black];

    /// The other side.
    pub fn opposite(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    /// Seat index (White = 0).
    pub fn index(self) -> usize {
        match self {
            Color::White => 0,
            Color::Black => 1,
        }
    }
}

impl From<chess::Color> for Color {
    fn from(color: chess::Color) -> Self {
        match color {
            chess::Color::White => Color::White,
            chess::Color::Black => Color::Black,
        }
    }
}

/// Time control selected when seeking a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    /// Ten minutes per side.
    #[default]
    Classic,
    /// Five minutes per side.
    Blitz,
    /// Two minutes per side.
    Bullet,
}

impl GameMode {
    /// All modes, one matchmaking queue each.
    pub const ALL: [GameMode; 3] = [GameMode::Classic, GameMode::Blitz, GameMode::Bullet];

    /// Initial clock per side, in seconds.
    pub fn clock_seconds(self) -> i64 {
        match self {
            GameMode::Classic => 10 * 60,
            GameMode::Blitz => 5 * 60,
            GameMode::Bullet => 2 * 60,
        }
    }
}

/// How the session came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionKind {
    /// Paired by the matchmaking queue.
    QuickMatched,
    /// Created by one player and joined by code (or a local hot-seat game).
    Private,
}

/// Match type recorded with the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// Quick-matched online game.
    Online,
    /// Private room game.
    Private,
    /// Both sides played from one connection; never rated.
    Local,
}

impl MatchKind {
    /// Whether results of this kind touch ratings and statistics.
    pub fn affects_standings(self) -> bool {
        !matches!(self, MatchKind::Local)
    }
}

/// Session lifecycle status.
///
/// Ordered: a session only ever moves to a greater status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    /// Private room waiting for a second player.
    WaitingForSecondPlayer,
    /// Both seats taken, waiting for the start signal.
    Ready,
    /// Game in progress.
    Active,
    /// Game over notice sent, not yet finalized.
    Finished,
    /// Persistence requested; awaiting removal.
    Finalized,
}

/// Player identity carried into a seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfile {
    /// Account id, absent for anonymous players.
    pub player_id: Option<String>,
    /// Display name.
    pub username: String,
    /// Current rating, if known.
    pub rating: Option<i32>,
}

impl PlayerProfile {
    /// Profile with an id and rating.
    pub fn new(player_id: impl Into<String>, username: impl Into<String>, rating: Option<i32>) -> Self {
        Self {
            player_id: Some(player_id.into()),
            username: username.into(),
            rating,
        }
    }

    /// Profile without an account.
    pub fn anonymous(username: impl Into<String>) -> Self {
        Self {
            player_id: None,
            username: username.into(),
            rating: None,
        }
    }

    /// Whether both id and username are present and non-blank.
    pub fn has_identity(&self) -> bool {
        self.has_username()
            && self
                .player_id
                .as_deref()
                .map(|id| !id.trim().is_empty())
                .unwrap_or(false)
    }

    /// Whether the username is non-blank.
    pub fn has_username(&self) -> bool {
        !self.username.trim().is_empty()
    }
}

/// One accepted move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRecord {
    /// 1-based ply number.
    pub number: u32,
    /// Side that moved.
    pub color: Color,
    /// Origin square ("e2").
    pub from: String,
    /// Destination square ("e4").
    pub to: String,
    /// Promotion piece letter, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promotion: Option<char>,
    /// UCI notation ("e2e4", "e7e8q").
    pub notation: String,
    /// FEN after the move.
    pub fen_after: String,
    /// Position hash after the move.
    pub position_hash: u64,
}

/// Why a game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// Side to move is mated.
    #[serde(rename = "checkmate")]
    Checkmate,
    /// Side to move has no legal move and is not in check.
    #[serde(rename = "stalemate")]
    Stalemate,
    /// Same position three times.
    #[serde(rename = "threefold repetition")]
    ThreefoldRepetition,
    /// Neither side can mate.
    #[serde(rename = "insufficient material")]
    InsufficientMaterial,
    /// Fifty moves without capture or pawn move.
    #[serde(rename = "fifty move rule")]
    FiftyMoveRule,
    /// A player resigned.
    #[serde(rename = "resignation")]
    Resignation,
    /// A clock ran out.
    #[serde(rename = "timeout")]
    Timeout,
    /// A participant left.
    #[serde(rename = "disconnect")]
    Disconnect,
}

impl EndReason {
    /// Wire name of the reason.
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::Checkmate => "checkmate",
            EndReason::Stalemate => "stalemate",
            EndReason::ThreefoldRepetition => "threefold repetition",
            EndReason::InsufficientMaterial => "insufficient material",
            EndReason::FiftyMoveRule => "fifty move rule",
            EndReason::Resignation => "resignation",
            EndReason::Timeout => "timeout",
            EndReason::Disconnect => "disconnect",
        }
    }
}

/// Adjudicated result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameResult {
    /// Winning side, `None` for a draw.
    pub winner: Option<Color>,
    /// Why the game ended.
    pub reason: EndReason,
}

impl GameResult {
    /// Decisive result.
    pub fn win(winner: Color, reason: EndReason) -> Self {
        Self {
            winner: Some(winner),
            reason,
        }
    }

    /// Drawn result.
    pub fn draw(reason: EndReason) -> Self {
        Self { winner: None, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_only_advances() {
        assert!(SessionStatus::WaitingForSecondPlayer < SessionStatus::Ready);
        assert!(SessionStatus::Ready < SessionStatus::Active);
        assert!(SessionStatus::Active < SessionStatus::Finished);
        assert!(SessionStatus::Finished < SessionStatus::Finalized);
    }

    #[test]
    fn test_identity_requires_id_and_name() {
        assert!(PlayerProfile::new("1", "alice", Some(1200)).has_identity());
        assert!(!PlayerProfile::anonymous("alice").has_identity());
        assert!(!PlayerProfile::new("1", "  ", None).has_identity());
        assert!(!PlayerProfile::new("", "alice", None).has_identity());
    }

    #[test]
    fn test_end_reason_wire_names() {
        for reason in [
            EndReason::Checkmate,
            EndReason::ThreefoldRepetition,
            EndReason::Disconnect,
        ] {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
        }
    }

    #[test]
    fn test_mode_clocks() {
        assert_eq!(GameMode::Classic.clock_seconds(), 600);
        assert_eq!(GameMode::Blitz.clock_seconds(), 300);
        assert_eq!(GameMode::Bullet.clock_seconds(), 120);
        assert_eq!(GameMode::default(), GameMode::Classic);
    }
}
