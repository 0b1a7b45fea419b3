//! Room-based TCP chat router
//!
//! Clients connect over TCP, register a unique username, join named
//! rooms, and exchange room broadcasts and direct messages. An optional
//! bridge relays posts from an external WebSocket feed into a room.
//!
//! # Wire format
//! Every frame is an 8-byte little-endian length followed by a JSON
//! payload. A zero length means the peer is closing.
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `RegistryActor` owns all client and room tables
//! - Each connection has a session `handler` task talking to the registry
//! - Each registered client has a `ClientMailbox`: a bounded, lossy
//!   queue drained by its own writer task, so a slow reader never stalls
//!   the registry or other clients
//! - No locks around shared state; everything goes through message passing
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use tokio_util::sync::CancellationToken;
//! use chat_router::{ChatServer, Registry, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:9000").await?;
//!     let server = ChatServer::new(listener, Registry::spawn(), SessionConfig::default());
//!     server.run(CancellationToken::new()).await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod feed;
pub mod handler;
pub mod logger;
pub mod message;
pub mod registry;
pub mod room;
pub mod server;
pub mod terminal;
pub mod types;

// Re-export main types for convenience
pub use client::ClientMailbox;
pub use connection::Connection;
pub use error::ChatError;
pub use feed::{FeedBridge, FeedConfig};
pub use handler::{handle_connection, SessionConfig};
pub use message::Message;
pub use registry::{Registry, RegistryActor, RegistrySnapshot};
pub use room::RoomTable;
pub use server::ChatServer;
pub use types::ConnectionId;
