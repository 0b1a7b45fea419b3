//! Basic type definitions for the chat router
//!
//! Provides newtype wrappers for type safety:
//! - `ConnectionId`: UUID-based key the registry uses for a live connection

use uuid::Uuid;

/// Unique connection identifier (newtype pattern)
///
/// Assigned when a socket is accepted and used by the registry as the key
/// of its connection table and of every room member set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
