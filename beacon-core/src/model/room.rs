use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum accepted length for a room identifier.
pub const MAX_ROOM_ID_LEN: usize = 256;

/// Opaque room identifier, 1..=256 characters.
#[derive(Debug, Serialize, Deserialize, Clone, Hash, Eq, PartialEq)]
pub struct RoomId(String);

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum InvalidRoomId {
    #[error("room id must not be empty")]
    Empty,
    #[error("room id exceeds {MAX_ROOM_ID_LEN} characters")]
    TooLong,
}

impl RoomId {
    pub fn parse(s: impl Into<String>) -> Result<Self, InvalidRoomId> {
        let s = s.into();
        if s.is_empty() {
            return Err(InvalidRoomId::Empty);
        }
        if s.chars().count() > MAX_ROOM_ID_LEN {
            return Err(InvalidRoomId::TooLong);
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared room text under last-writer-wins semantics. `version` starts at 0
/// and moves by exactly 1 per accepted update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomDoc {
    pub version: u64,
    pub text: String,
}
