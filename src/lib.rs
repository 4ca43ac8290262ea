//! # Gambit Server
//!
//! Real-time chess sessions over WebSocket: matchmaking, private rooms,
//! server-validated moves, Elo ratings and match history.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      GAMBIT SERVER                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Identifiers and ratings                   │
//! │  ├── ids.rs      - Session ids, room codes, connection ids   │
//! │  └── rating.rs   - Elo calculator                            │
//! │                                                              │
//! │  game/           - Chess state (no I/O)                      │
//! │  ├── state.rs    - Colors, modes, statuses, results          │
//! │  ├── rules.rs    - Legal moves and terminal detection        │
//! │  └── clock.rs    - Per-side game clocks                      │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── server.rs   - WebSocket server                          │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── hub.rs      - Event routing                             │
//! │  ├── matchmaking.rs - Per-mode waiting queues                │
//! │  ├── session.rs  - Session state machine and store           │
//! │  └── auth.rs     - Optional identity tokens                  │
//! │                                                              │
//! │  persist/        - Match history                             │
//! │  ├── record.rs   - Finished match records                    │
//! │  ├── store.rs    - Storage backends                          │
//! │  └── finalizer.rs- Background persistence worker             │
//! │                                                              │
//! │  moderation/     - Player reports and temporary bans         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Time
//!
//! Session, clock and moderation operations take `now` explicitly. Only
//! the hub and server read the wall clock.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod moderation;
pub mod network;
pub mod persist;

// Re-export commonly used types
pub use core::{rating_delta, ConnectionId, RatingChange, Score, SessionId};
pub use game::state::{Color, EndReason, GameMode, GameResult, PlayerProfile, SessionStatus};
pub use moderation::{ModerationPolicy, ReportDesk, ReportOutcome};
pub use network::{GameHub, GameServer, ServerConfig};
pub use persist::{Finalizer, MatchRecord, MatchStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
