//! Client mailbox ("client actor")
//!
//! One per registered user: a bounded outbound queue plus the writer task
//! that drains it into the user's connection. The writer is the only task
//! that writes to the connection while the mailbox is alive.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::message::Message;
use crate::types::ConnectionId;

/// Default outbound queue capacity per client
pub const DEFAULT_MAILBOX_CAPACITY: usize = 128;

/// Registered client: username, outbound queue and writer task
///
/// Owned by the registry once added. Dropping the queue sender (via
/// [`ClientMailbox::close`]) lets the writer drain what is left and exit.
#[derive(Debug)]
pub struct ClientMailbox {
    /// Unique username claimed at registration
    pub username: String,
    /// Connection this mailbox writes to
    pub connection_id: ConnectionId,
    /// Outbound queue (bounded, lossy)
    queue: mpsc::Sender<Message>,
    /// Writer task; completes after the queue is drained or a send fails
    writer: JoinHandle<()>,
    connection: Arc<Connection>,
}

impl ClientMailbox {
    /// Create the mailbox and start its writer task
    pub fn spawn(username: String, connection: Arc<Connection>, capacity: usize) -> Self {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        let writer = tokio::spawn(write_loop(rx, Arc::clone(&connection)));

        Self {
            username,
            connection_id: connection.id(),
            queue,
            writer,
            connection,
        }
    }

    /// Queue a message without blocking.
    ///
    /// Returns false when the message was dropped because the queue is full
    /// or the writer has already stopped.
    pub fn enqueue(&self, msg: Message) -> bool {
        match self.queue.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                debug!(
                    "Mailbox of '{}' full, dropping {} message",
                    self.username,
                    msg.kind()
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Close the queue and wait for the writer to drain and exit.
    ///
    /// The writer closes the connection on its way out.
    pub async fn close(self) {
        let ClientMailbox {
            username,
            queue,
            writer,
            ..
        } = self;
        drop(queue);

        if let Err(e) = writer.await {
            warn!("Writer task of '{}' ended abnormally: {}", username, e);
        }
    }

    /// Like [`ClientMailbox::close`], but give up on the drain after
    /// `timeout` and force the connection closed so the writer exits.
    pub async fn close_within(self, timeout: std::time::Duration) {
        let connection = Arc::clone(&self.connection);
        let username = self.username.clone();

        if tokio::time::timeout(timeout, self.close()).await.is_err() {
            warn!("Drain of '{}' timed out, closing connection", username);
            connection.close().await;
        }
    }
}

/// Drain the queue in FIFO order; stop on the first failed send
async fn write_loop(mut rx: mpsc::Receiver<Message>, connection: Arc<Connection>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = connection.send(&msg).await {
            debug!("Send on connection {} failed: {}", connection.id(), e);
            break;
        }
    }

    connection.close().await;
    debug!("Writer task ended for connection {}", connection.id());
}
