//! Persistence
//!
//! Finalized matches leave the live session store as a `MatchRecord` and
//! are written by a background worker.

pub mod finalizer;
pub mod record;
pub mod store;

pub use finalizer::{persist, Finalizer};
pub use record::{MatchId, MatchRecord, PlayerOutcome, PlayerStats};
pub use store::{JsonLinesMatchStore, MatchStore, MemoryMatchStore, StoreError};
