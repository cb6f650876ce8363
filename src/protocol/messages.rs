//! Payload types carried inside frames
//!
//! Every payload is JSON. The frame type byte identifies which struct a
//! payload decodes to.

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Author shown when a chat payload carries no name
pub const UNKNOWN_AUTHOR: &str = "unknown";

/// Longest accepted display name
pub const MAX_DISPLAY_NAME_LEN: usize = 50;

// =============================================================================
// Control (0x00 - 0x0F)
// =============================================================================

/// Connection request, the first frame a client sends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    pub version: u32,
    /// Room to join; absent or blank selects the default room
    #[serde(default)]
    pub room: Option<String>,
}

impl Hello {
    pub fn new(room: Option<&str>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            room: room.map(str::to_string),
        }
    }
}

/// Server response to Hello
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloAck {
    pub version: u32,
    /// Identifier assigned to this connection
    pub session_id: String,
    /// Room the connection was attached to
    pub room: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    pub timestamp: u64,
}

/// Explicit disconnect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goodbye {
    pub reason: String,
}

// =============================================================================
// Session (0x10 - 0x2F)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchRoom {
    pub room: String,
}

/// Acknowledges a room switch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomJoined {
    pub room: String,
}

// =============================================================================
// Room payloads (0x30 - 0x3F)
// =============================================================================

/// Free-text chat payload: `{ from, msg }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub from: String,
    pub msg: String,
}

impl ChatMessage {
    pub fn new(from: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            msg: msg.into(),
        }
    }

    /// Reject bodies that must never be sent
    pub fn validate(&self) -> Result<()> {
        if self.msg.trim().is_empty() {
            return Err(ChatError::protocol("Chat message body is empty"));
        }
        Ok(())
    }

    /// Author name to relay.
    ///
    /// A blank `from` falls back to the sender's announced display name, then
    /// to [`UNKNOWN_AUTHOR`].
    pub fn author<'a>(&'a self, display_name: &'a str) -> &'a str {
        [self.from.trim(), display_name.trim()]
            .into_iter()
            .find(|name| !name.is_empty())
            .unwrap_or(UNKNOWN_AUTHOR)
    }
}

/// Join/presence announcement: `{ name }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub name: String,
}

impl Presence {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Trimmed display name, validated for length
    pub fn display_name(&self) -> Result<String> {
        let name = self.name.trim();
        if name.is_empty() || name.chars().count() > MAX_DISPLAY_NAME_LEN {
            return Err(ChatError::protocol(format!(
                "Invalid display name: {:?}",
                self.name
            )));
        }
        Ok(name.to_string())
    }
}

/// The payloads a room fans out to its members
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomPayload {
    Chat(ChatMessage),
    Presence(Presence),
}

// =============================================================================
// Room queries (0x40 - 0x4F)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomExists {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomStatus {
    pub name: String,
    pub exists: bool,
}

impl RoomStatus {
    /// Whether the name is free to be claimed by a new room
    pub fn is_available(&self) -> bool {
        !self.exists
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRoom {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomCreated {
    pub name: String,
    /// False when the room already existed
    pub created: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListRooms {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomList {
    /// Room names in creation order
    pub rooms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveRoom {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomRemoved {
    pub name: String,
    /// False when the room was missing or still had members
    pub removed: bool,
}
