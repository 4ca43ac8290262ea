//! Identifiers
//!
//! Session identifiers, connection identifiers and private room codes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Length of a private room code.
pub const ROOM_CODE_LEN: usize = 6;

/// Prefix of quick-match session identifiers.
pub const QUICK_MATCH_PREFIX: &str = "ROOM_";

const ROOM_CODE_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Identifier of a live session.
///
/// Always stored upper-case so that client-supplied codes match
/// regardless of the case they were typed in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Normalize an identifier received from a client.
    pub fn from_client(raw: &str) -> Self {
        Self(raw.trim().to_ascii_uppercase())
    }

    /// Fresh identifier for a quick-matched session (UUIDv4 space).
    pub fn quick() -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}{}", QUICK_MATCH_PREFIX, uuid.to_ascii_uppercase()))
    }

    /// Fresh short code for a private room.
    ///
    /// Codes are short, so the caller must check for collisions.
    pub fn room_code<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let code: String = (0..ROOM_CODE_LEN)
            .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier has the shape of a private room code.
    pub fn is_room_code(&self) -> bool {
        self.0.len() == ROOM_CODE_LEN && self.0.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one transport connection.
///
/// Stable for the lifetime of the connection and never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Allocate the next connection id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ids_are_case_insensitive() {
        let a = SessionId::from_client("ab12cd");
        let b = SessionId::from_client("  AB12CD ");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "AB12CD");
    }

    #[test]
    fn test_room_code_shape() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let code = SessionId::room_code(&mut rng);
            assert!(code.is_room_code(), "bad code {}", code);
        }
    }

    #[test]
    fn test_quick_ids_are_distinct() {
        let a = SessionId::quick();
        let b = SessionId::quick();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with(QUICK_MATCH_PREFIX));
        assert!(!a.is_room_code());
    }

    #[test]
    fn test_connection_ids_increase() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert!(b > a);
    }
}
