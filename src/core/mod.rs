//! Core primitives.
//!
//! Identifiers and the rating formula. No I/O, no locking.

pub mod ids;
pub mod rating;

// Re-export core types
pub use ids::{ConnectionId, SessionId, ROOM_CODE_LEN};
pub use rating::{clamp_rating, rating_delta, RatingChange, Score, DEFAULT_K_FACTOR};
