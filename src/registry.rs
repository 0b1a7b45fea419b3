//! Registry actor implementation
//!
//! The single owner of all shared routing state: live connections, the
//! username table and room membership. Every mutation is a command sent
//! over a channel and applied by one task, so no table is ever locked or
//! touched from anywhere else.
//!
//! Two queues feed the actor:
//! - control commands (add/remove/join/leave/queries) on an unbounded
//!   channel, each answered through a oneshot reply
//! - fire-and-forget deliveries (room broadcast, direct message) on a
//!   bounded channel; a full channel makes the submitter wait

use std::collections::{BTreeMap, HashMap};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::client::ClientMailbox;
use crate::error::ChatError;
use crate::message::Message;
use crate::room::RoomTable;
use crate::types::ConnectionId;

/// Capacity of the broadcast/direct delivery queue
pub const DELIVERY_QUEUE_CAPACITY: usize = 1024;

/// Control commands sent from sessions to the registry actor
#[derive(Debug)]
pub enum RegistryCommand {
    /// Register a client under its username
    Add {
        mailbox: ClientMailbox,
        reply: oneshot::Sender<Result<(), Rejected>>,
    },
    /// Forget a connection and purge it from every room
    Remove {
        connection_id: ConnectionId,
        reply: oneshot::Sender<Option<Removed>>,
    },
    /// Join a room (created on first use)
    JoinRoom {
        connection_id: ConnectionId,
        room: String,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    /// Leave a room (deleted when empty); replies whether the client
    /// was a member
    LeaveRoom {
        connection_id: ConnectionId,
        room: String,
        reply: oneshot::Sender<bool>,
    },
    /// Ask whether a connection is currently in a room
    IsMember {
        connection_id: ConnectionId,
        room: String,
        reply: oneshot::Sender<bool>,
    },
    /// Copy of the tables for diagnostics and tests
    Snapshot {
        reply: oneshot::Sender<RegistrySnapshot>,
    },
}

/// Fire-and-forget deliveries
#[derive(Debug)]
pub enum DeliveryCommand {
    /// Enqueue into every current member of a room
    BroadcastRoom { room: String, message: Message },
    /// Enqueue into one user's mailbox, if registered
    Direct { to: String, message: Message },
}

/// A refused registration; the mailbox is handed back to the caller
#[derive(Debug)]
pub struct Rejected {
    pub error: ChatError,
    /// None only when the registry task is gone
    pub mailbox: Option<ClientMailbox>,
}

/// A client taken out of the registry
///
/// The mailbox must still be closed by the caller; the registry never
/// waits on a writer task.
#[derive(Debug)]
pub struct Removed {
    pub mailbox: ClientMailbox,
    /// Rooms the client belonged to at removal time
    pub rooms: Vec<String>,
}

/// Point-in-time copy of the registry tables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    /// Registered usernames, sorted
    pub usernames: Vec<String>,
    /// room -> sorted member usernames
    pub rooms: BTreeMap<String, Vec<String>>,
}

/// Cloneable handle used to talk to the registry actor
#[derive(Debug, Clone)]
pub struct Registry {
    control: mpsc::UnboundedSender<RegistryCommand>,
    delivery: mpsc::Sender<DeliveryCommand>,
}

impl Registry {
    /// Create a handle and the actor it talks to. The actor must be run
    /// (usually via `tokio::spawn(actor.run())`).
    pub fn new() -> (Self, RegistryActor) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (delivery_tx, delivery_rx) = mpsc::channel(DELIVERY_QUEUE_CAPACITY);

        let handle = Self {
            control: control_tx,
            delivery: delivery_tx,
        };
        (handle, RegistryActor::new(control_rx, delivery_rx))
    }

    /// Create a handle and spawn its actor on the current runtime
    pub fn spawn() -> Self {
        let (handle, actor) = Self::new();
        tokio::spawn(actor.run());
        handle
    }

    /// Register a mailbox. Fails with `DuplicateOrEmptyUsername` without
    /// touching any table.
    pub async fn add(&self, mailbox: ClientMailbox) -> Result<(), Rejected> {
        let (reply, rx) = oneshot::channel();
        if let Err(mpsc::error::SendError(cmd)) =
            self.control.send(RegistryCommand::Add { mailbox, reply })
        {
            let mailbox = match cmd {
                RegistryCommand::Add { mailbox, .. } => Some(mailbox),
                _ => None,
            };
            return Err(Rejected {
                error: ChatError::RegistryClosed,
                mailbox,
            });
        }

        rx.await.unwrap_or_else(|_| {
            Err(Rejected {
                error: ChatError::RegistryClosed,
                mailbox: None,
            })
        })
    }

    /// Remove a connection. Returns the removed client, or None if the
    /// connection was never registered.
    pub async fn remove(&self, connection_id: ConnectionId) -> Option<Removed> {
        self.request(|reply| RegistryCommand::Remove {
            connection_id,
            reply,
        })
        .await
        .ok()
        .flatten()
    }

    pub async fn join_room(&self, connection_id: ConnectionId, room: &str) -> Result<(), ChatError> {
        self.request(|reply| RegistryCommand::JoinRoom {
            connection_id,
            room: room.to_string(),
            reply,
        })
        .await?
    }

    /// Succeeds whether or not the client was a member (unless the
    /// registry is gone); the flag tells which.
    pub async fn leave_room(&self, connection_id: ConnectionId, room: &str) -> Result<bool, ChatError> {
        self.request(|reply| RegistryCommand::LeaveRoom {
            connection_id,
            room: room.to_string(),
            reply,
        })
        .await
    }

    pub async fn is_member(&self, connection_id: ConnectionId, room: &str) -> Result<bool, ChatError> {
        self.request(|reply| RegistryCommand::IsMember {
            connection_id,
            room: room.to_string(),
            reply,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<RegistrySnapshot, ChatError> {
        self.request(|reply| RegistryCommand::Snapshot { reply }).await
    }

    /// Enqueue a message for every member of `room`. Waits only if the
    /// delivery queue is saturated.
    pub async fn broadcast_room(&self, room: &str, message: Message) {
        let cmd = DeliveryCommand::BroadcastRoom {
            room: room.to_string(),
            message,
        };
        if self.delivery.send(cmd).await.is_err() {
            debug!("Registry closed, dropping broadcast to room {}", room);
        }
    }

    /// Enqueue a message for `to`; silently does nothing if absent
    pub async fn direct(&self, to: &str, message: Message) {
        let cmd = DeliveryCommand::Direct {
            to: to.to_string(),
            message,
        };
        if self.delivery.send(cmd).await.is_err() {
            debug!("Registry closed, dropping direct message to {}", to);
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.control
            .send(make(reply))
            .map_err(|_| ChatError::RegistryClosed)?;
        rx.await.map_err(|_| ChatError::RegistryClosed)
    }
}

/// The registry actor
///
/// Owns the connection table, the username index and the room table.
/// Uses HashMap for O(1) lookups; the username index points into the
/// connection table so each mailbox has exactly one owner.
pub struct RegistryActor {
    /// All registered clients: ConnectionId -> ClientMailbox
    clients: HashMap<ConnectionId, ClientMailbox>,
    /// Username -> ConnectionId (bijective with `clients`)
    usernames: HashMap<String, ConnectionId>,
    /// Room -> member connections
    rooms: RoomTable,
    control: mpsc::UnboundedReceiver<RegistryCommand>,
    delivery: mpsc::Receiver<DeliveryCommand>,
}

impl RegistryActor {
    fn new(
        control: mpsc::UnboundedReceiver<RegistryCommand>,
        delivery: mpsc::Receiver<DeliveryCommand>,
    ) -> Self {
        Self {
            clients: HashMap::new(),
            usernames: HashMap::new(),
            rooms: RoomTable::new(),
            control,
            delivery,
        }
    }

    /// Run the registry event loop
    ///
    /// Processes commands until every handle is dropped. Nothing in here
    /// awaits a client, so a slow peer can never stall the loop.
    ///
    /// Deliveries are drained before any control request is looked at, so
    /// a broadcast or direct a caller submitted before a control request
    /// is always applied first.
    pub async fn run(mut self) {
        info!("Registry started");

        loop {
            tokio::select! {
                biased;
                Some(cmd) = self.delivery.recv() => self.handle_delivery(cmd),
                Some(cmd) = self.control.recv() => self.handle_command(cmd),
                else => break,
            }
        }

        info!("Registry shutting down");
    }

    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Add { mailbox, reply } => {
                let _ = reply.send(self.handle_add(mailbox));
            }
            RegistryCommand::Remove {
                connection_id,
                reply,
            } => {
                let _ = reply.send(self.handle_remove(connection_id));
            }
            RegistryCommand::JoinRoom {
                connection_id,
                room,
                reply,
            } => {
                let _ = reply.send(self.handle_join_room(connection_id, room));
            }
            RegistryCommand::LeaveRoom {
                connection_id,
                room,
                reply,
            } => {
                let _ = reply.send(self.handle_leave_room(connection_id, &room));
            }
            RegistryCommand::IsMember {
                connection_id,
                room,
                reply,
            } => {
                let _ = reply.send(self.rooms.contains(&room, connection_id));
            }
            RegistryCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn handle_delivery(&mut self, cmd: DeliveryCommand) {
        match cmd {
            DeliveryCommand::BroadcastRoom { room, message } => {
                for member in self.rooms.members(&room) {
                    if let Some(client) = self.clients.get(member) {
                        client.enqueue(message.clone());
                    }
                }
            }
            DeliveryCommand::Direct { to, message } => {
                if let Some(client) = self.usernames.get(&to).and_then(|id| self.clients.get(id)) {
                    client.enqueue(message);
                }
            }
        }
    }

    fn handle_add(&mut self, mailbox: ClientMailbox) -> Result<(), Rejected> {
        if mailbox.username.is_empty() || self.usernames.contains_key(&mailbox.username) {
            debug!("Rejected registration of '{}'", mailbox.username);
            return Err(Rejected {
                error: ChatError::DuplicateOrEmptyUsername,
                mailbox: Some(mailbox),
            });
        }

        info!(
            "Client '{}' registered on connection {}",
            mailbox.username, mailbox.connection_id
        );
        self.usernames
            .insert(mailbox.username.clone(), mailbox.connection_id);
        self.clients.insert(mailbox.connection_id, mailbox);
        debug!(
            "Total clients: {}, Total rooms: {}",
            self.clients.len(),
            self.rooms.room_count()
        );
        Ok(())
    }

    fn handle_remove(&mut self, connection_id: ConnectionId) -> Option<Removed> {
        let mailbox = self.clients.remove(&connection_id)?;
        self.usernames.remove(&mailbox.username);
        let rooms = self.rooms.remove_member(connection_id);

        info!(
            "Client '{}' removed (was in {} room(s))",
            mailbox.username,
            rooms.len()
        );
        debug!(
            "Total clients: {}, Total rooms: {}",
            self.clients.len(),
            self.rooms.room_count()
        );
        Some(Removed { mailbox, rooms })
    }

    fn handle_join_room(&mut self, connection_id: ConnectionId, room: String) -> Result<(), ChatError> {
        if room.is_empty() {
            return Err(ChatError::EmptyRoomName);
        }
        if self.rooms.join(&room, connection_id) {
            debug!("Room {} created", room);
        }
        Ok(())
    }

    fn handle_leave_room(&mut self, connection_id: ConnectionId, room: &str) -> bool {
        let was_member = self.rooms.contains(room, connection_id);
        if self.rooms.leave(room, connection_id) {
            debug!("Room {} deleted (empty)", room);
        }
        was_member
    }

    fn snapshot(&self) -> RegistrySnapshot {
        let name_of = |id: &ConnectionId| self.clients.get(id).map(|c| c.username.clone());

        let mut usernames: Vec<String> = self.usernames.keys().cloned().collect();
        usernames.sort();

        let mut rooms = BTreeMap::new();
        for room in self.rooms.names() {
            let mut members: Vec<String> = self.rooms.members(room).filter_map(name_of).collect();
            members.sort();
            rooms.insert(room.to_string(), members);
        }

        RegistrySnapshot { usernames, rooms }
    }
}
