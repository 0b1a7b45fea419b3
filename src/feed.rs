//! External feed bridge
//!
//! Subscribes to a real-time event stream (Bluesky Jetstream by default),
//! turns every post into a room chat message and broadcasts it into one
//! configured room through the registry.
//!
//! The reconnect loop is an explicit state machine:
//! `Disconnected -> Connecting -> Streaming -> Disconnected`, with capped
//! exponential backoff between attempts. The transport sits behind
//! [`FeedConnector`] / [`FeedStream`] so the loop runs against in-memory
//! fakes in tests.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ChatError;
use crate::message::Message;
use crate::registry::Registry;

/// Public Jetstream endpoint, filtered to plain posts
pub const DEFAULT_FEED_URL: &str =
    "wss://jetstream1.us-east.bsky.network/subscribe?wantedCollections=app.bsky.feed.post";

/// Prefix of the sender identity given to feed posts
pub const FEED_SENDER_PREFIX: &str = "bsky:";

pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// WebSocket URL of the event stream
    pub url: String,
    /// Room every post is broadcast into
    pub room: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl FeedConfig {
    pub fn new(room: impl Into<String>) -> Self {
        Self {
            url: DEFAULT_FEED_URL.to_string(),
            room: room.into(),
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }
}

/// Capped exponential backoff
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; the following one doubles, up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Where the bridge is in its reconnect cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Disconnected,
    Connecting,
    Streaming,
}

/// Opens a new event stream
#[async_trait]
pub trait FeedConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn FeedStream>, ChatError>;
}

/// An open event stream yielding raw JSON events
#[async_trait]
pub trait FeedStream: Send {
    /// Next event, or `Ok(None)` once the remote side closed the stream
    async fn next_event(&mut self) -> Result<Option<String>, ChatError>;

    async fn close(&mut self);
}

/// A post extracted from the feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPost {
    /// Origin identifier of the author (a DID for Bluesky)
    pub origin: String,
    /// Trimmed, non-empty post text
    pub text: String,
}

impl FeedPost {
    /// Wrap the post as a chat message into `room`
    pub fn into_room_chat(self, room: &str) -> Message {
        Message::room_chat(format!("{}{}", FEED_SENDER_PREFIX, self.origin), room, self.text)
    }
}

#[derive(Debug, Deserialize)]
struct FeedEvent {
    kind: String,
    #[serde(default)]
    did: Option<String>,
    #[serde(default)]
    commit: Option<FeedCommit>,
}

#[derive(Debug, Deserialize)]
struct FeedCommit {
    #[serde(default)]
    repo: Option<String>,
    #[serde(default)]
    record: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PostRecord {
    text: String,
}

/// Parse one raw event. Anything that is not a commit carrying a post
/// with non-blank text yields None.
pub fn parse_post(raw: &str) -> Option<FeedPost> {
    let event: FeedEvent = serde_json::from_str(raw).ok()?;
    if event.kind != "commit" {
        return None;
    }

    let commit = event.commit?;
    let record: PostRecord = serde_json::from_value(commit.record?).ok()?;
    let text = record.text.trim();
    if text.is_empty() {
        return None;
    }

    // Jetstream carries the author at the top level; older payloads in the commit
    let origin = commit.repo.or(event.did).unwrap_or_default();
    Some(FeedPost {
        origin,
        text: text.to_string(),
    })
}

/// The bridge task
pub struct FeedBridge<C> {
    connector: C,
    registry: Registry,
    config: FeedConfig,
    state: FeedState,
}

impl<C: FeedConnector> FeedBridge<C> {
    pub fn new(connector: C, registry: Registry, config: FeedConfig) -> Self {
        Self {
            connector,
            registry,
            config,
            state: FeedState::Disconnected,
        }
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    /// Run until `cancel` fires. Dial and read failures are logged and
    /// retried; they never end the loop.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);
        info!("Feed bridge started for room {}", self.config.room);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.transition(FeedState::Connecting);
            let connected = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.connector.connect() => result,
            };

            match connected {
                Ok(mut stream) => {
                    info!("Feed connected");
                    backoff.reset();
                    self.transition(FeedState::Streaming);

                    let cancelled = self.stream_events(stream.as_mut(), &cancel).await;
                    stream.close().await;
                    if cancelled {
                        break;
                    }
                }
                Err(e) => warn!("{}", e),
            }

            self.transition(FeedState::Disconnected);
            let delay = backoff.next_delay();
            info!("Feed reconnecting in {:?}", delay);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.transition(FeedState::Disconnected);
        info!("Feed bridge stopped");
    }

    /// Forward posts until the stream ends or fails. Returns true if it
    /// stopped because of cancellation.
    async fn stream_events(&self, stream: &mut dyn FeedStream, cancel: &CancellationToken) -> bool {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return true,
                event = stream.next_event() => event,
            };

            match event {
                Ok(Some(raw)) => {
                    let Some(post) = parse_post(&raw) else {
                        continue;
                    };
                    debug!("Feed post from {}", post.origin);
                    let room = self.config.room.as_str();
                    self.registry
                        .broadcast_room(room, post.into_room_chat(room))
                        .await;
                }
                Ok(None) => {
                    info!("Feed stream closed by remote");
                    return false;
                }
                Err(e) => {
                    warn!("{}", e);
                    return false;
                }
            }
        }
    }

    fn transition(&mut self, next: FeedState) {
        if self.state != next {
            debug!("Feed state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}

/// WebSocket transport for Bluesky Jetstream
#[derive(Debug, Clone)]
pub struct JetstreamConnector {
    url: String,
}

impl JetstreamConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl FeedConnector for JetstreamConnector {
    async fn connect(&self) -> Result<Box<dyn FeedStream>, ChatError> {
        info!("Feed dialing {}", self.url);
        let (ws, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| ChatError::FeedDial(e.to_string()))?;
        Ok(Box::new(JetstreamStream { ws }))
    }
}

struct JetstreamStream {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FeedStream for JetstreamStream {
    async fn next_event(&mut self) -> Result<Option<String>, ChatError> {
        while let Some(msg) = self.ws.next().await {
            match msg.map_err(|e| ChatError::FeedRead(e.to_string()))? {
                WsMessage::Text(text) => return Ok(Some(text.to_string())),
                WsMessage::Binary(data) => {
                    return Ok(Some(String::from_utf8_lossy(&data).into_owned()));
                }
                WsMessage::Close(_) => return Ok(None),
                // Pong is handled automatically by tungstenite
                _ => {}
            }
        }
        Ok(None)
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}
