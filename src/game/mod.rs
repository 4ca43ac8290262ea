//! Game Logic Module
//!
//! Everything about a single game that does not touch the network.
//!
//! ## Module Structure
//!
//! - `state`: Colors, modes, lifecycle status, player profiles, move log
//! - `rules`: Move legality and terminal detection over the `chess` crate
//! - `clock`: Per-side countdown clocks

pub mod clock;
pub mod rules;
pub mod state;

// Re-export key types
pub use clock::GameClock;
pub use rules::{AppliedMove, Position, RulesError, Terminal};
pub use state::{
    Color, EndReason, GameMode, GameResult, MatchKind, MoveRecord, PlayerProfile, SessionKind,
    SessionStatus,
};
