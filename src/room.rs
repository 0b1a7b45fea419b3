//! Room membership table
//!
//! Rooms are not stored entities: a room exists exactly while its member
//! set is non-empty. It is created on first join and removed on last leave.

use std::collections::{HashMap, HashSet};

use crate::types::ConnectionId;

/// room name -> set of member connections
#[derive(Debug, Default)]
pub struct RoomTable {
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member, creating the room on first use.
    ///
    /// Returns true if the room was created by this call.
    pub fn join(&mut self, room: &str, member: ConnectionId) -> bool {
        let created = !self.rooms.contains_key(room);
        self.rooms.entry(room.to_string()).or_default().insert(member);
        created
    }

    /// Remove a member; drops the room if it becomes empty.
    ///
    /// Returns true if the room was deleted by this call.
    pub fn leave(&mut self, room: &str, member: ConnectionId) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        members.remove(&member);
        if members.is_empty() {
            self.rooms.remove(room);
            true
        } else {
            false
        }
    }

    /// Purge a member from every room, returning the rooms it was in
    pub fn remove_member(&mut self, member: ConnectionId) -> Vec<String> {
        let mut left = Vec::new();
        self.rooms.retain(|room, members| {
            if members.remove(&member) {
                left.push(room.clone());
            }
            !members.is_empty()
        });
        left.sort();
        left
    }

    /// Members of a room (empty if the room does not exist)
    pub fn members(&self, room: &str) -> impl Iterator<Item = &ConnectionId> {
        self.rooms.get(room).into_iter().flatten()
    }

    pub fn contains(&self, room: &str, member: ConnectionId) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.contains(&member))
    }

    /// Names of all current (non-empty) rooms
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rooms.keys().map(String::as_str)
    }

    pub fn room_exists(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
