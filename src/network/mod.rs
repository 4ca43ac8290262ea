//! Network Layer
//!
//! WebSocket server, wire protocol, matchmaking and live sessions.
//! Chess rules live in `game/`; this layer only routes and sequences.

pub mod auth;
pub mod hub;
pub mod matchmaking;
pub mod protocol;
pub mod server;
pub mod session;

pub use auth::{authenticate, validate_token, AuthConfig, AuthError, TokenClaims};
pub use hub::{GameHub, HubConfig};
pub use matchmaking::{MatchOutcome, MatchmakingQueue, Seeker};
pub use protocol::{ClientMessage, ErrorCode, PlayerInfo, ServerError, ServerMessage};
pub use server::{GameServer, GameServerError, ServerConfig};
pub use session::{GameSession, Participant, SessionError, SessionManager, SharedSession};
