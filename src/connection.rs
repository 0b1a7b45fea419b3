//! Framed connection over one byte stream
//!
//! Owns both halves of a socket (or any `AsyncRead + AsyncWrite` stream,
//! which is how the tests run it over `tokio::io::duplex`).
//! Writers are serialized by a mutex held for the whole frame so frames
//! never interleave on the wire. `close` is idempotent and wakes any task
//! blocked in `send` or `receive`.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec;
use crate::error::ChatError;
use crate::message::Message;
use crate::types::ConnectionId;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One framed byte-stream connection
pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    max_frame_len: Option<u64>,
    reader: Mutex<BufReader<BoxedReader>>,
    writer: Mutex<Option<BoxedWriter>>,
    closed: CancellationToken,
}

impl Connection {
    /// Wrap a stream, assigning it a fresh connection ID
    pub fn new<S>(stream: S, peer: Option<SocketAddr>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let reader: BoxedReader = Box::new(reader);
        let writer: BoxedWriter = Box::new(writer);

        Self {
            id: ConnectionId::new(),
            peer,
            max_frame_len: None,
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(Some(writer)),
            closed: CancellationToken::new(),
        }
    }

    /// Reject inbound frames larger than `max` bytes
    pub fn with_max_frame_len(mut self, max: u64) -> Self {
        self.max_frame_len = Some(max);
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Write one full frame.
    ///
    /// The write lock is held across the whole frame, including partial
    /// writes, so concurrent senders never interleave bytes.
    pub async fn send(&self, message: &Message) -> Result<(), ChatError> {
        let frame = codec::encode(message)?;
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(ChatError::ConnectionClosed);
        };

        tokio::select! {
            _ = self.closed.cancelled() => Err(ChatError::ConnectionClosed),
            result = async {
                writer.write_all(&frame).await?;
                writer.flush().await
            } => result.map_err(ChatError::from),
        }
    }

    /// Read and decode one full frame.
    ///
    /// End-of-stream, a zero-length prefix and a local `close` all surface
    /// as `ChatError::ConnectionClosed`.
    pub async fn receive(&self) -> Result<Message, ChatError> {
        let mut reader = self.reader.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(ChatError::ConnectionClosed),
            result = codec::read_frame(&mut *reader, self.max_frame_len) => result,
        }
    }

    /// Close the connection. Safe to call repeatedly and from any task.
    pub async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();

        // Pending sends observe the token and release the lock
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!("Shutdown of connection {} failed: {}", self.id, e);
            }
        }
        debug!("Connection {} closed", self.id);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}
