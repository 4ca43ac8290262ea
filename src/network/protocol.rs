//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is one JSON object tagged by `type`, fields in camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::core::{clamp_rating, SessionId};
use crate::game::state::{Color, EndReason, GameMode, PlayerProfile};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Seek a quick match.
    FindMatch(FindMatchRequest),

    /// Leave every matchmaking queue.
    CancelMatch,

    /// Submit a move.
    Move(MoveRequest),

    /// Resign the game.
    Resign(ResignRequest),

    /// Claim the opponent's clock ran out.
    Timeout(TimeoutClaim),

    /// Chat line for the other participant.
    ChatMessage(ChatRequest),

    /// Report another player.
    ReportPlayer(ReportRequest),

    /// Open a private room.
    #[serde(rename = "create-room")]
    CreateRoom(CreateRoomRequest),

    /// Join a private room by code.
    #[serde(rename = "join-room")]
    JoinRoom(JoinRoomRequest),

    /// Start a ready private room.
    #[serde(rename = "start-game")]
    StartGame(StartGameRequest),

    /// Start a hot-seat game played from this connection.
    LocalGame(LocalGameRequest),

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

/// Player identity as sent by clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    /// Account id (string or number on the wire).
    #[serde(alias = "id", default, deserialize_with = "string_or_number")]
    pub player_id: Option<String>,
    /// Display name.
    #[serde(default)]
    pub username: String,
    /// Rating.
    #[serde(alias = "elo", default)]
    pub rating: Option<i32>,
}

impl PlayerInfo {
    /// Convert to a seat profile.
    pub fn into_profile(self) -> PlayerProfile {
        PlayerProfile {
            player_id: self.player_id.filter(|id| !id.trim().is_empty()),
            username: self.username.trim().to_string(),
            rating: self.rating.map(clamp_rating),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(i64),
    }

    Ok(Option::<Repr>::deserialize(deserializer)?.map(|repr| match repr {
        Repr::Text(s) => s,
        Repr::Number(n) => n.to_string(),
    }))
}

fn default_rated() -> bool {
    true
}

/// Quick-match request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindMatchRequest {
    /// Seeker identity.
    pub player: PlayerInfo,
    /// Requested time control.
    #[serde(default)]
    pub mode: GameMode,
    /// Whether the seeker wants a rated game.
    #[serde(default = "default_rated")]
    pub rated: bool,
    /// Optional identity token.
    #[serde(default)]
    pub token: Option<String>,
}

/// Move submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    /// Target session.
    #[serde(alias = "roomId", alias = "roomCode", alias = "code")]
    pub session_id: String,
    /// Origin square.
    pub from: String,
    /// Destination square.
    pub to: String,
    /// Promotion piece letter.
    #[serde(default)]
    pub promotion: Option<String>,
    /// Client's idea of the resulting position. Ignored.
    #[serde(alias = "fenAfterMove", default)]
    pub resulting_position: Option<String>,
}

/// Resignation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResignRequest {
    /// Target session.
    #[serde(alias = "roomId", alias = "roomCode", alias = "code")]
    pub session_id: String,
    /// Resigning player's name, used when one connection holds both seats.
    #[serde(default)]
    pub username: Option<String>,
}

/// Clock expiry claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutClaim {
    /// Target session.
    #[serde(alias = "roomId", alias = "roomCode", alias = "code")]
    pub session_id: String,
    /// Color claimed to have won on time.
    pub winner: Color,
}

/// Chat line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Target session.
    #[serde(alias = "roomId", alias = "roomCode", alias = "code")]
    pub session_id: String,
    /// Display name of the sender.
    #[serde(default)]
    pub sender: String,
    /// Text.
    pub message: String,
}

/// Player report. Fields are optional so that missing ones can be answered
/// with a report error instead of a parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportRequest {
    /// Reporting username.
    pub reporter: Option<String>,
    /// Reported username.
    pub reported: Option<String>,
    /// Reason.
    pub reason: Option<String>,
}

/// Private room creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    /// Room creator, seated White.
    #[serde(alias = "player")]
    pub creator: PlayerInfo,
}

/// Private room join.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    /// Room code.
    #[serde(alias = "sessionId", alias = "roomId", alias = "roomCode")]
    pub code: String,
    /// Joining player, seated Black.
    pub player: PlayerInfo,
}

/// Private room start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGameRequest {
    /// Room code.
    #[serde(alias = "sessionId", alias = "roomId", alias = "roomCode")]
    pub code: String,
    /// Time control.
    #[serde(default)]
    pub mode: GameMode,
}

/// Local hot-seat game.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalGameRequest {
    /// White player.
    pub white: PlayerInfo,
    /// Black player.
    pub black: PlayerInfo,
    /// Time control.
    #[serde(default)]
    pub mode: GameMode,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Matchmaking status ("waiting", "cancelled").
    Status {
        /// Status word.
        status: String,
        /// Optional detail.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Game is starting.
    StartGame(GameStart),

    /// Opponent played a move.
    OpponentMove(MoveNotice),

    /// Game ended.
    GameOver(GameOverNotice),

    /// Relayed chat line.
    ChatMessage {
        /// Sender's display name.
        sender: String,
        /// Text.
        message: String,
    },

    /// Report accepted.
    ReportSuccess {
        /// Confirmation text.
        message: String,
    },

    /// Report rejected.
    ReportError {
        /// Reason text.
        message: String,
    },

    /// Private room opened.
    #[serde(rename = "room-created")]
    RoomCreated {
        /// Code to share.
        code: SessionId,
    },

    /// Private room has both players.
    #[serde(rename = "room-ready")]
    RoomReady(RoomReadyNotice),

    /// Private room closed before starting.
    #[serde(rename = "room-closed")]
    RoomClosed {
        /// Code of the closed room.
        code: SessionId,
    },

    /// Error for the originating request.
    Error(ServerError),

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server time in milliseconds since the epoch.
        #[serde(rename = "serverTime")]
        server_time: i64,
    },

    /// Server is shutting down.
    Shutdown {
        /// Reason text.
        reason: String,
    },
}

/// Game start notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStart {
    /// Session to address moves to.
    pub session_id: SessionId,
    /// White seat.
    pub white: PlayerProfile,
    /// Black seat.
    pub black: PlayerProfile,
    /// Time control.
    pub mode: GameMode,
    /// Initial clock per side in seconds.
    pub clock_seconds: i64,
    /// Whether ratings are in play.
    pub rated: bool,
    /// Recipient's color; absent when the recipient holds both seats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
}

/// Move relayed to the opponent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveNotice {
    /// Session the move belongs to.
    pub session_id: SessionId,
    /// Side that moved.
    pub color: Color,
    /// Origin square.
    pub from: String,
    /// Destination square.
    pub to: String,
    /// Promotion piece letter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<char>,
    /// UCI notation.
    pub notation: String,
    /// Position after the move.
    pub fen: String,
}

/// Game over notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOverNotice {
    /// Session that ended.
    pub session_id: SessionId,
    /// Winner's username, `None` for a draw.
    pub winner: Option<String>,
    /// Winner's color, `None` for a draw.
    pub winner_color: Option<Color>,
    /// Why the game ended.
    pub reason: EndReason,
    /// Final position.
    pub final_position: String,
    /// Moves in UCI notation.
    pub moves: Vec<String>,
}

/// Private room ready notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomReadyNotice {
    /// Room code.
    pub code: SessionId,
    /// Creator.
    pub white: PlayerProfile,
    /// Joiner.
    pub black: PlayerProfile,
}

/// Server error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Restriction expiry for `banned`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
}

impl ServerError {
    /// Error without an expiry.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            until: None,
        }
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed or incomplete request.
    InvalidInput,
    /// Identity token rejected.
    InvalidToken,
    /// Player is temporarily restricted.
    Banned,
    /// No session under that id.
    RoomNotFound,
    /// Session has no free seat.
    RoomFull,
    /// Connection limit reached.
    ServerOverloaded,
    /// Unexpected server failure.
    InternalError,
}

impl ServerMessage {
    /// Error reply.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError::new(code, message))
    }

    /// Matchmaking status reply.
    pub fn status(status: &str) -> Self {
        ServerMessage::Status {
            status: status.to_string(),
            message: None,
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_match_with_numeric_id() {
        let json = r#"{"type":"findMatch","player":{"id":42,"username":"alice","elo":1200},"mode":"blitz"}"#;
        match ClientMessage::from_json(json).unwrap() {
            ClientMessage::FindMatch(req) => {
                assert_eq!(req.player.player_id.as_deref(), Some("42"));
                assert_eq!(req.player.rating, Some(1200));
                assert_eq!(req.mode, GameMode::Blitz);
                assert!(req.rated);
                assert!(req.token.is_none());
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_declared_rating_is_clamped() {
        let json = r#"{"type":"findMatch","player":{"id":"x","username":"mallory","rating":2000000000},"mode":"bullet"}"#;
        let ClientMessage::FindMatch(req) = ClientMessage::from_json(json).unwrap() else {
            panic!("expected findMatch");
        };
        assert_eq!(req.player.into_profile().rating, Some(crate::core::rating::MAX_RATING));

        let low = PlayerInfo {
            rating: Some(-300),
            ..Default::default()
        };
        assert_eq!(low.into_profile().rating, Some(0));
    }

    #[test]
    fn test_move_accepts_room_id_alias() {
        let json = r#"{"type":"move","roomId":"ab12cd","from":"e2","to":"e4","fenAfterMove":"x"}"#;
        match ClientMessage::from_json(json).unwrap() {
            ClientMessage::Move(req) => {
                assert_eq!(req.session_id, "ab12cd");
                assert_eq!(req.resulting_position.as_deref(), Some("x"));
                assert!(req.promotion.is_none());
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_room_messages_use_kebab_tags() {
        let json = r#"{"type":"join-room","code":"AB12CD","player":{"username":"bob"}}"#;
        assert!(matches!(
            ClientMessage::from_json(json).unwrap(),
            ClientMessage::JoinRoom(_)
        ));

        let msg = ServerMessage::RoomCreated {
            code: SessionId::from_client("ab12cd"),
        };
        assert_eq!(msg.to_json().unwrap(), r#"{"type":"room-created","code":"AB12CD"}"#);
    }

    #[test]
    fn test_report_with_missing_fields_parses() {
        let json = r#"{"type":"reportPlayer","reporter":"amy"}"#;
        match ClientMessage::from_json(json).unwrap() {
            ClientMessage::ReportPlayer(req) => {
                assert_eq!(req.reporter.as_deref(), Some("amy"));
                assert!(req.reported.is_none());
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_game_over_shape() {
        let msg = ServerMessage::GameOver(GameOverNotice {
            session_id: SessionId::from_client("ROOM_1"),
            winner: Some("alice".to_string()),
            winner_color: Some(Color::White),
            reason: EndReason::ThreefoldRepetition,
            final_position: "fen".to_string(),
            moves: vec!["e2e4".to_string()],
        });
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "gameOver");
        assert_eq!(value["winnerColor"], "white");
        assert_eq!(value["reason"], "threefold repetition");
        assert_eq!(value["finalPosition"], "fen");
    }

    #[test]
    fn test_error_codes() {
        let msg = ServerMessage::error(ErrorCode::RoomNotFound, "Room not found");
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"code\":\"room_not_found\""));
        assert!(!json.contains("until"));
    }

    #[test]
    fn test_pong_field_names() {
        let msg = ServerMessage::Pong {
            timestamp: 7,
            server_time: 9,
        };
        assert_eq!(msg.to_json().unwrap(), r#"{"type":"pong","timestamp":7,"serverTime":9}"#);
    }
}
