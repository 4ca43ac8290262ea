//! Chess Rules
//!
//! Thin adapter over the `chess` crate: move legality, application and
//! terminal-position detection including the draw rules the crate leaves
//! to the caller (repetition, fifty moves, insufficient material).

use std::str::FromStr;

use chess::{BitBoard, Board, BoardStatus, ChessMove, MoveGen, Piece, Rank, Square};
use thiserror::Error;

use super::state::Color;

/// Halfmove clock value at which the fifty-move rule applies.
pub const FIFTY_MOVE_PLIES: u32 = 100;

/// Occurrences of a position that make a threefold repetition.
pub const REPETITION_COUNT: usize = 3;

/// Errors from validating or applying a move.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RulesError {
    /// Square name could not be parsed.
    #[error("Invalid square: {0}")]
    InvalidSquare(String),

    /// Promotion letter is not one of q, r, b, n.
    #[error("Invalid promotion piece: {0}")]
    InvalidPromotion(String),

    /// Move is not legal in the current position.
    #[error("Illegal move: {0}")]
    IllegalMove(String),

    /// Position string could not be parsed.
    #[error("Invalid FEN: {0}")]
    InvalidFen(String),
}

/// Terminal state of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    /// The given side delivered mate.
    Checkmate {
        /// Side that won.
        winner: Color,
    },
    /// No legal moves, not in check.
    Stalemate,
    /// Current position occurred three times.
    ThreefoldRepetition,
    /// Neither side can force mate.
    InsufficientMaterial,
    /// One hundred plies without a capture or pawn move.
    FiftyMoveRule,
}

/// Result of applying one move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMove {
    /// Side that moved.
    pub color: Color,
    /// Origin square.
    pub from: String,
    /// Destination square.
    pub to: String,
    /// Promotion piece letter actually applied.
    pub promotion: Option<char>,
    /// UCI notation.
    pub notation: String,
    /// FEN after the move.
    pub fen_after: String,
    /// Zobrist hash after the move.
    pub position_hash: u64,
}

/// Game position with the history needed for draw rules.
#[derive(Debug, Clone)]
pub struct Position {
    board: Board,
    history: Vec<u64>,
    halfmove_clock: u32,
    fullmove_number: u32,
}

impl Default for Position {
    fn default() -> Self {
        Self::new()
    }
}

impl Position {
    /// Standard starting position.
    pub fn new() -> Self {
        Self::from_board(Board::default(), 0, 1)
    }

    /// Position from a FEN string.
    ///
    /// Missing move counters default to `0 1`.
    pub fn from_fen(fen: &str) -> Result<Self, RulesError> {
        let board = Board::from_str(fen).map_err(|e| RulesError::InvalidFen(e.to_string()))?;
        let mut counters = fen.split_whitespace().skip(4);
        let halfmove = parse_counter(counters.next(), 0, fen)?;
        let fullmove = parse_counter(counters.next(), 1, fen)?;
        Ok(Self::from_board(board, halfmove, fullmove))
    }

    fn from_board(board: Board, halfmove_clock: u32, fullmove_number: u32) -> Self {
        Self {
            history: vec![board.get_hash()],
            board,
            halfmove_clock,
            fullmove_number,
        }
    }

    /// Side to move.
    pub fn turn(&self) -> Color {
        self.board.side_to_move().into()
    }

    /// Current position as FEN.
    pub fn fen(&self) -> String {
        // the board prints placeholder counters; replace them with ours
        let board = self.board.to_string();
        let placement: Vec<&str> = board.split_whitespace().take(4).collect();
        format!(
            "{} {} {}",
            placement.join(" "),
            self.halfmove_clock,
            self.fullmove_number
        )
    }

    /// Current position hash.
    pub fn hash(&self) -> u64 {
        self.board.get_hash()
    }

    /// Plies since the last capture or pawn move.
    pub fn halfmove_clock(&self) -> u32 {
        self.halfmove_clock
    }

    /// Full move number, incremented after each Black move.
    pub fn fullmove_number(&self) -> u32 {
        self.fullmove_number
    }

    /// Validate and apply a move given in square notation.
    ///
    /// `promotion` is only consulted when a pawn reaches the last rank and
    /// defaults to a queen.
    pub fn apply_move(
        &mut self,
        from: &str,
        to: &str,
        promotion: Option<&str>,
    ) -> Result<AppliedMove, RulesError> {
        let source = parse_square(from)?;
        let dest = parse_square(to)?;

        let moving = self.board.piece_on(source);
        let promotes = moving == Some(Piece::Pawn)
            && (dest.get_rank() == Rank::Eighth || dest.get_rank() == Rank::First);
        let promotion = if promotes {
            Some(parse_promotion(promotion)?)
        } else {
            None
        };

        let candidate = ChessMove::new(source, dest, promotion);
        if !MoveGen::new_legal(&self.board).any(|m| m == candidate) {
            return Err(RulesError::IllegalMove(format!("{}{}", from, to)));
        }

        let color: Color = self.board.side_to_move().into();
        let resets_clock = moving == Some(Piece::Pawn) || self.board.piece_on(dest).is_some();

        self.board = self.board.make_move_new(candidate);
        self.halfmove_clock = if resets_clock { 0 } else { self.halfmove_clock + 1 };
        if color == Color::Black {
            self.fullmove_number += 1;
        }
        self.history.push(self.board.get_hash());

        let promotion = promotion.map(promotion_letter);
        let mut notation = format!("{}{}", source, dest);
        if let Some(letter) = promotion {
            notation.push(letter);
        }

        Ok(AppliedMove {
            color,
            from: source.to_string(),
            to: dest.to_string(),
            promotion,
            notation,
            fen_after: self.fen(),
            position_hash: self.board.get_hash(),
        })
    }

    /// Terminal state, checked in order: mate, stalemate, repetition,
    /// insufficient material, fifty moves.
    pub fn terminal(&self) -> Option<Terminal> {
        match self.board.status() {
            BoardStatus::Checkmate => {
                let loser: Color = self.board.side_to_move().into();
                return Some(Terminal::Checkmate {
                    winner: loser.opposite(),
                });
            }
            BoardStatus::Stalemate => return Some(Terminal::Stalemate),
            BoardStatus::Ongoing => {}
        }

        let current = self.board.get_hash();
        if self.history.iter().filter(|&&h| h == current).count() >= REPETITION_COUNT {
            return Some(Terminal::ThreefoldRepetition);
        }
        if self.insufficient_material() {
            return Some(Terminal::InsufficientMaterial);
        }
        if self.halfmove_clock >= FIFTY_MOVE_PLIES {
            return Some(Terminal::FiftyMoveRule);
        }
        None
    }

    fn insufficient_material(&self) -> bool {
        let board = &self.board;
        let heavy = *board.pieces(Piece::Pawn) | *board.pieces(Piece::Rook) | *board.pieces(Piece::Queen);
        if heavy.popcnt() > 0 {
            return false;
        }

        let knights = *board.pieces(Piece::Knight);
        let bishops = *board.pieces(Piece::Bishop);
        let minors = knights.popcnt() + bishops.popcnt();
        if minors <= 1 {
            return true;
        }

        // bishops only, all on one square color
        knights.popcnt() == 0 && same_shade(bishops)
    }
}

fn same_shade(squares: BitBoard) -> bool {
    let mut shades = squares.map(|sq| (sq.get_rank().to_index() + sq.get_file().to_index()) % 2);
    match shades.next() {
        Some(first) => shades.all(|s| s == first),
        None => true,
    }
}

fn parse_counter(field: Option<&str>, default: u32, fen: &str) -> Result<u32, RulesError> {
    match field {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| RulesError::InvalidFen(fen.to_string())),
    }
}

fn parse_square(name: &str) -> Result<Square, RulesError> {
    Square::from_str(&name.trim().to_ascii_lowercase())
        .map_err(|_| RulesError::InvalidSquare(name.to_string()))
}

fn parse_promotion(letter: Option<&str>) -> Result<Piece, RulesError> {
    match letter.map(|l| l.trim().to_ascii_lowercase()) {
        None => Ok(Piece::Queen),
        Some(l) => match l.as_str() {
            "" | "q" => Ok(Piece::Queen),
            "r" => Ok(Piece::Rook),
            "b" => Ok(Piece::Bishop),
            "n" => Ok(Piece::Knight),
            _ => Err(RulesError::InvalidPromotion(l)),
        },
    }
}

fn promotion_letter(piece: Piece) -> char {
    match piece {
        Piece::Rook => 'r',
        Piece::Bishop => 'b',
        Piece::Knight => 'n',
        _ => 'q',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play(position: &mut Position, moves: &[&str]) {
        for mv in moves {
            let (from, to) = mv.split_at(2);
            position.apply_move(from, to, None).unwrap();
        }
    }

    #[test]
    fn test_opening_move() {
        let mut position = Position::new();
        let applied = position.apply_move("e2", "e4", None).unwrap();
        assert_eq!(applied.color, Color::White);
        assert_eq!(applied.notation, "e2e4");
        assert_eq!(position.turn(), Color::Black);
        assert!(applied.fen_after.starts_with("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b"));
    }

    #[test]
    fn test_illegal_move_rejected() {
        let mut position = Position::new();
        let before = position.fen();
        assert!(matches!(
            position.apply_move("e2", "e5", None),
            Err(RulesError::IllegalMove(_))
        ));
        assert!(matches!(
            position.apply_move("z9", "e4", None),
            Err(RulesError::InvalidSquare(_))
        ));
        assert_eq!(position.fen(), before);
    }

    #[test]
    fn test_scholars_mate() {
        let mut position = Position::new();
        play(&mut position, &["e2e4", "e7e5", "f1c4", "b8c6", "d1h5", "g8f6", "h5f7"]);
        assert_eq!(
            position.terminal(),
            Some(Terminal::Checkmate {
                winner: Color::White
            })
        );
    }

    #[test]
    fn test_stalemate() {
        let mut position = Position::from_fen("7k/8/6K1/8/8/8/5Q2/8 w - - 0 1").unwrap();
        assert_eq!(position.terminal(), None);
        position.apply_move("f2", "f7", None).unwrap();
        assert_eq!(position.terminal(), Some(Terminal::Stalemate));
    }

    #[test]
    fn test_threefold_repetition() {
        let mut position = Position::new();
        play(&mut position, &["g1f3", "g8f6", "f3g1", "f6g8"]);
        assert_eq!(position.terminal(), None);
        play(&mut position, &["g1f3", "g8f6", "f3g1", "f6g8"]);
        assert_eq!(position.terminal(), Some(Terminal::ThreefoldRepetition));
    }

    #[test]
    fn test_insufficient_material() {
        let kings = Position::from_fen("8/8/4k3/8/8/4K3/8/8 w - - 0 1").unwrap();
        assert_eq!(kings.terminal(), Some(Terminal::InsufficientMaterial));

        let knight = Position::from_fen("8/8/4k3/8/8/4K3/5N2/8 w - - 0 1").unwrap();
        assert_eq!(knight.terminal(), Some(Terminal::InsufficientMaterial));

        // c1 and b8 are both dark squares
        let same_bishops = Position::from_fen("1b6/8/4k3/8/8/4K3/8/2B5 w - - 0 1").unwrap();
        assert_eq!(same_bishops.terminal(), Some(Terminal::InsufficientMaterial));

        let rook = Position::from_fen("8/8/4k3/8/8/4K3/8/R7 w - - 0 1").unwrap();
        assert_eq!(rook.terminal(), None);
    }

    #[test]
    fn test_promotion_defaults_to_queen() {
        let mut position = Position::from_fen("8/4P3/8/8/8/2k5/8/K7 w - - 0 1").unwrap();
        let applied = position.apply_move("e7", "e8", None).unwrap();
        assert_eq!(applied.promotion, Some('q'));
        assert_eq!(applied.notation, "e7e8q");

        let mut position = Position::from_fen("8/4P3/8/8/8/2k5/8/K7 w - - 0 1").unwrap();
        let applied = position.apply_move("e7", "e8", Some("n")).unwrap();
        assert_eq!(applied.promotion, Some('n'));
    }

    #[test]
    fn test_promotion_ignored_for_ordinary_moves() {
        let mut position = Position::new();
        let applied = position.apply_move("e2", "e4", Some("q")).unwrap();
        assert_eq!(applied.promotion, None);
        assert_eq!(applied.notation, "e2e4");
    }

    #[test]
    fn test_fifty_move_rule() {
        let mut position = Position::from_fen("8/8/4k3/8/8/4K3/8/R7 w - - 99 60").unwrap();
        assert_eq!(position.halfmove_clock(), 99);
        assert_eq!(position.terminal(), None);

        position.apply_move("a1", "a2", None).unwrap();
        assert_eq!(position.halfmove_clock(), 100);
        assert_eq!(position.terminal(), Some(Terminal::FiftyMoveRule));
    }

    #[test]
    fn test_fen_carries_move_counters() {
        let mut position = Position::new();
        assert!(position.fen().ends_with(" w KQkq - 0 1"));
        play(&mut position, &["g1f3"]);
        assert!(position.fen().ends_with(" 1 1"));
        play(&mut position, &["g8f6"]);
        assert!(position.fen().ends_with(" 2 2"));
        assert_eq!(position.fullmove_number(), 2);

        let resumed = Position::from_fen("8/8/4k3/8/8/4K3/8/R7 b - - 12 40").unwrap();
        assert_eq!(resumed.fen(), "8/8/4k3/8/8/4K3/8/R7 b - - 12 40");
        assert!(Position::from_fen("8/8/4k3/8/8/4K3/8/R7 b - - x 40").is_err());
    }

    #[test]
    fn test_halfmove_clock_resets_on_pawn_move() {
        let mut position = Position::new();
        play(&mut position, &["g1f3", "g8f6"]);
        assert_eq!(position.halfmove_clock(), 2);
        play(&mut position, &["e2e4"]);
        assert_eq!(position.halfmove_clock(), 0);
    }
}
