//! Message protocol definitions
//!
//! The closed set of messages carried inside a frame. Serialized as JSON
//! using Serde's internally tagged enum, so every payload names its variant
//! in a `type` field. Unknown tags decode to [`Message::Unknown`] instead of
//! failing, which lets the session handler treat them as a terminal case.

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Username used for notices generated by the server itself
pub const SERVER_NAME: &str = "server";

/// Every message that can travel in a frame, in either direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Claim a username (must be the first frame of a session)
    Registration { username: String },
    /// Join a room, creating it if needed
    RoomJoin { username: String, room: String },
    /// Leave a room
    RoomLeave { username: String, room: String },
    /// Chat message addressed to every member of a room
    RoomChat {
        username: String,
        room: String,
        body: String,
    },
    /// Private message to a single user
    DirectChat {
        from: String,
        to: String,
        body: String,
    },
    /// Informational text from the server, optionally scoped to a room
    ServerNotice {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<String>,
    },
    /// Any variant this build does not recognize
    #[serde(other)]
    Unknown,
}

impl Message {
    /// Server notice not tied to any room
    pub fn notice(text: impl Into<String>) -> Self {
        Message::ServerNotice {
            text: text.into(),
            room: None,
        }
    }

    /// Server notice announced inside a room
    pub fn room_notice(room: impl Into<String>, text: impl Into<String>) -> Self {
        Message::ServerNotice {
            text: text.into(),
            room: Some(room.into()),
        }
    }

    pub fn room_chat(
        username: impl Into<String>,
        room: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Message::RoomChat {
            username: username.into(),
            room: room.into(),
            body: body.into(),
        }
    }

    pub fn direct_chat(
        from: impl Into<String>,
        to: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Message::DirectChat {
            from: from.into(),
            to: to.into(),
            body: body.into(),
        }
    }

    /// Replace the sender identity of a chat message.
    ///
    /// Only `RoomChat` and `DirectChat` carry a sender that clients could
    /// spoof; every other variant is returned unchanged.
    pub fn with_sender(self, sender: &str) -> Self {
        match self {
            Message::RoomChat { room, body, .. } => Message::RoomChat {
                username: sender.to_string(),
                room,
                body,
            },
            Message::DirectChat { to, body, .. } => Message::DirectChat {
                from: sender.to_string(),
                to,
                body,
            },
            other => other,
        }
    }

    /// Short variant name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Registration { .. } => "registration",
            Message::RoomJoin { .. } => "room_join",
            Message::RoomLeave { .. } => "room_leave",
            Message::RoomChat { .. } => "room_chat",
            Message::DirectChat { .. } => "direct_chat",
            Message::ServerNotice { .. } => "server_notice",
            Message::Unknown => "unknown",
        }
    }
}

/// Convert a recoverable ChatError into the notice sent to the client
impl From<&ChatError> for Message {
    fn from(err: &ChatError) -> Self {
        let text = match err {
            ChatError::DuplicateOrEmptyUsername => {
                "Registration failed: username is empty or already exists".to_string()
            }
            ChatError::EmptyRoomName => "Room name cannot be empty".to_string(),
            ChatError::NotInRoom(room) => {
                return Message::room_notice(
                    room.clone(),
                    format!("You are not a member of room '{}'; /join {} first", room, room),
                );
            }
            ChatError::RegistrationRequired => "You must register first".to_string(),
            // Fatal errors are not typically converted (connection closes)
            _ => "Internal error".to_string(),
        };
        Message::notice(text)
    }
}
