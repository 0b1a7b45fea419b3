//! Session handler
//!
//! One per accepted connection. Drives the registration handshake, then
//! reads frames and turns them into registry operations until the
//! connection ends. The session state machine is
//! `Unregistered -> Registered -> Closed`; every path into `Closed` goes
//! through the same teardown, which runs exactly once.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::client::{ClientMailbox, DEFAULT_MAILBOX_CAPACITY};
use crate::connection::Connection;
use crate::error::ChatError;
use crate::message::Message;
use crate::registry::{Registry, Rejected, Removed};

/// Default cap on inbound frame payloads (1 MiB)
pub const DEFAULT_MAX_FRAME_LEN: u64 = 1024 * 1024;

/// Default bound on how long teardown waits for a mailbox to drain
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-session tunables
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Outbound queue capacity of each client mailbox
    pub mailbox_capacity: usize,
    /// Largest inbound payload accepted; None means unlimited
    pub max_frame_len: Option<u64>,
    /// How long teardown waits for queued messages to flush
    pub drain_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            max_frame_len: Some(DEFAULT_MAX_FRAME_LEN),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionState {
    Unregistered,
    Registered { username: String },
    Closed,
}

/// Handle a new connection for its whole lifetime
///
/// Returns `Ok(())` when the peer simply went away, or the error that
/// ended the session otherwise.
pub async fn handle_connection<S>(
    stream: S,
    peer: Option<SocketAddr>,
    registry: Registry,
    config: SessionConfig,
) -> Result<(), ChatError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let mut connection = Connection::new(stream, peer);
    if let Some(max) = config.max_frame_len {
        connection = connection.with_max_frame_len(max);
    }

    let session = Session {
        connection: Arc::new(connection),
        registry,
        config,
        state: SessionState::Unregistered,
    };
    session.run().await
}

struct Session {
    connection: Arc<Connection>,
    registry: Registry,
    config: SessionConfig,
    state: SessionState,
}

impl Session {
    async fn run(mut self) -> Result<(), ChatError> {
        debug!(
            "Session started for connection {} from {:?}",
            self.connection.id(),
            self.connection.peer()
        );

        let result = self.drive().await;
        self.close().await;

        match result {
            Err(ChatError::ConnectionClosed) => Ok(()),
            other => other,
        }
    }

    async fn drive(&mut self) -> Result<(), ChatError> {
        let username = self.register().await?;
        self.state = SessionState::Registered {
            username: username.clone(),
        };

        loop {
            let msg = self.connection.receive().await?;
            if !self.dispatch(&username, msg).await? {
                return Ok(());
            }
        }
    }

    /// Unregistered: the first frame must be a registration
    async fn register(&mut self) -> Result<String, ChatError> {
        let username = match self.connection.receive().await? {
            Message::Registration { username } => username,
            other => {
                debug!(
                    "Connection {} sent {} before registering",
                    self.connection.id(),
                    other.kind()
                );
                let err = ChatError::RegistrationRequired;
                if let Err(e) = self.connection.send(&Message::from(&err)).await {
                    debug!(
                        "Could not tell connection {} to register: {}",
                        self.connection.id(),
                        e
                    );
                }
                return Err(err);
            }
        };

        if username.is_empty() {
            if let Err(e) = self
                .connection
                .send(&Message::notice("Username cannot be empty"))
                .await
            {
                debug!(
                    "Could not report empty username on connection {}: {}",
                    self.connection.id(),
                    e
                );
            }
            return Err(ChatError::DuplicateOrEmptyUsername);
        }

        let mailbox = ClientMailbox::spawn(
            username.clone(),
            Arc::clone(&self.connection),
            self.config.mailbox_capacity,
        );

        if let Err(Rejected { error, mailbox }) = self.registry.add(mailbox).await {
            info!("Registration of '{}' refused: {}", username, error);
            if let Some(mailbox) = mailbox {
                // Flushed by the writer before it closes the connection
                mailbox.enqueue(Message::from(&error));
                mailbox.close_within(self.config.drain_timeout).await;
            }
            return Err(error);
        }

        info!(
            "Client {} registered as '{}'",
            self.connection.id(),
            username
        );
        self.registry
            .direct(
                &username,
                Message::notice(format!(
                    "Welcome, {}! Use /join <room> to start chatting",
                    username
                )),
            )
            .await;

        Ok(username)
    }

    /// Registered: route one inbound message. Returns false to end the
    /// session.
    async fn dispatch(&mut self, username: &str, msg: Message) -> Result<bool, ChatError> {
        let id = self.connection.id();

        match msg {
            Message::Registration { .. } => {
                self.notify(
                    username,
                    Message::notice(format!("Already registered as {}", username)),
                )
                .await;
            }
            Message::RoomJoin { room, .. } => match self.registry.join_room(id, &room).await {
                Ok(()) => {
                    debug!("'{}' joined room {}", username, room);
                    self.registry
                        .broadcast_room(
                            &room,
                            Message::room_notice(room.as_str(), format!("{} joined the room", username)),
                        )
                        .await;
                }
                Err(e) if !e.is_fatal() => self.notify(username, Message::from(&e)).await,
                Err(e) => return Err(e),
            },
            Message::RoomLeave { room, .. } => {
                if self.registry.leave_room(id, &room).await? {
                    debug!("'{}' left room {}", username, room);
                    self.registry
                        .broadcast_room(
                            &room,
                            Message::room_notice(room.as_str(), format!("{} left the room", username)),
                        )
                        .await;
                }
                self.notify(username, Message::room_notice(room.as_str(), "You left the room"))
                    .await;
            }
            Message::RoomChat { ref room, .. } => {
                let room = room.clone();
                if self.registry.is_member(id, &room).await? {
                    self.registry
                        .broadcast_room(&room, msg.with_sender(username))
                        .await;
                } else {
                    self.notify(username, Message::from(&ChatError::NotInRoom(room)))
                        .await;
                }
            }
            Message::DirectChat { ref to, .. } => {
                let to = to.clone();
                self.registry.direct(&to, msg.with_sender(username)).await;
            }
            Message::ServerNotice { .. } | Message::Unknown => {
                warn!(
                    "Unexpected {} message from '{}', closing session",
                    msg.kind(),
                    username
                );
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Deliver a notice to this session's own client through its mailbox
    async fn notify(&self, username: &str, msg: Message) {
        self.registry.direct(username, msg).await;
    }

    /// Closed: remove from the registry, announce the departure, flush and
    /// close the connection.
    async fn close(&mut self) {
        let state = std::mem::replace(&mut self.state, SessionState::Closed);

        if let SessionState::Registered { username } = state {
            if let Some(Removed { mailbox, rooms }) = self.registry.remove(self.connection.id()).await {
                for room in &rooms {
                    self.registry
                        .broadcast_room(
                            room,
                            Message::room_notice(room.as_str(), format!("{} disconnected", username)),
                        )
                        .await;
                }
                mailbox.close_within(self.config.drain_timeout).await;
            }
            info!("Client '{}' disconnected", username);
        }

        self.connection.close().await;
    }
}
