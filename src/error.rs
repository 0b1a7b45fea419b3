//! Error types for the chat router
//!
//! One taxonomy for the whole crate. Uses thiserror for ergonomic error
//! definitions; `is_fatal` tells a session whether to terminate or report
//! the problem back to the client and carry on.

use thiserror::Error;

/// Crate-wide error type
#[derive(Debug, Error)]
pub enum ChatError {
    /// Frame payload did not parse as a message (fatal to the session)
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    /// Socket read/write failure (fatal to the session or writer)
    #[error("connection I/O error: {0}")]
    ConnectionIo(#[from] std::io::Error),

    /// Peer closed the stream or sent a zero-length prefix
    #[error("connection closed")]
    ConnectionClosed,

    /// Inbound length prefix exceeds the configured cap
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: u64, max: u64 },

    /// Registration with an empty or already registered username
    #[error("username is empty or already exists")]
    DuplicateOrEmptyUsername,

    /// Room join with an empty room name
    #[error("room name cannot be empty")]
    EmptyRoomName,

    /// Room chat from a client that is not a member of the room
    #[error("not a member of room '{0}'")]
    NotInRoom(String),

    /// First frame of a session was not a registration
    #[error("registration required")]
    RegistrationRequired,

    /// The registry task is gone (fatal - internal channel broken)
    #[error("registry is no longer running")]
    RegistryClosed,

    /// Could not connect to the external feed (retried with backoff)
    #[error("feed dial failed: {0}")]
    FeedDial(String),

    /// External feed stream failed mid-read (retried with backoff)
    #[error("feed read failed: {0}")]
    FeedRead(String),
}

impl ChatError {
    /// Whether this error ends the session it occurred in.
    ///
    /// Registration failures are handled separately by the session handler,
    /// which always terminates before a client is registered.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ChatError::EmptyRoomName | ChatError::NotInRoom(_) | ChatError::DuplicateOrEmptyUsername
        )
    }
}
