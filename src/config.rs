//! Command line and environment configuration for both binaries
//!
//! Library code never reads the environment itself; these types turn
//! arguments into the plain config structs the library consumes.

use std::time::Duration;

use clap::Parser;

use crate::client::DEFAULT_MAILBOX_CAPACITY;
use crate::feed::{FeedConfig, DEFAULT_FEED_URL};
use crate::handler::{SessionConfig, DEFAULT_MAX_FRAME_LEN};

/// Chat router server
#[derive(Parser, Debug, Clone)]
#[command(name = "chat_server", version, about = "Room-based TCP chat router")]
pub struct ServerArgs {
    /// Port to listen on (positional form, overrides --port)
    #[arg(value_name = "PORT")]
    pub listen_port: Option<u16>,

    /// Port to listen on
    #[arg(short = 'p', long, env = "CHAT_PORT", default_value_t = 9000)]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "CHAT_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Outbound queue capacity per client; overflow is dropped
    #[arg(long, default_value_t = DEFAULT_MAILBOX_CAPACITY)]
    pub mailbox_capacity: usize,

    /// Largest inbound frame payload in bytes (0 = unlimited)
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_LEN)]
    pub max_frame_len: u64,

    /// How long a disconnecting client's queue may take to flush
    #[arg(long, default_value_t = 5000)]
    pub drain_timeout_ms: u64,

    /// Room that receives the external feed; the bridge is off when unset
    #[arg(long, env = "CHAT_FEED_ROOM")]
    pub feed_room: Option<String>,

    /// WebSocket URL of the external feed
    #[arg(long, env = "CHAT_FEED_URL", default_value = DEFAULT_FEED_URL)]
    pub feed_url: String,
}

impl ServerArgs {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.listen_port.unwrap_or(self.port))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            mailbox_capacity: self.mailbox_capacity,
            max_frame_len: (self.max_frame_len > 0).then_some(self.max_frame_len),
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
        }
    }

    pub fn feed_config(&self) -> Option<FeedConfig> {
        let room = self.feed_room.as_ref().filter(|room| !room.is_empty())?;
        let mut config = FeedConfig::new(room.clone());
        config.url = self.feed_url.clone();
        Some(config)
    }
}

/// Terminal chat client
#[derive(Parser, Debug, Clone)]
#[command(name = "chat_client", version, about = "Terminal client for the chat router")]
pub struct ClientArgs {
    /// Username to register with
    pub username: String,

    /// Server address as host:port
    pub server: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_port() {
        let args = ServerArgs::try_parse_from(["chat_server", "7000"]).unwrap();
        assert_eq!(args.bind_addr(), "0.0.0.0:7000");
    }

    #[test]
    fn test_session_config_from_flags() {
        let args = ServerArgs::try_parse_from([
            "chat_server",
            "--mailbox-capacity",
            "4",
            "--max-frame-len",
            "0",
            "--drain-timeout-ms",
            "250",
        ])
        .unwrap();
        let config = args.session_config();
        assert_eq!(config.mailbox_capacity, 4);
        assert_eq!(config.max_frame_len, None);
        assert_eq!(config.drain_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_feed_config_only_with_room() {
        let args = ServerArgs::try_parse_from(["chat_server", "--feed-room", "bsky"]).unwrap();
        let feed = args.feed_config().unwrap();
        assert_eq!(feed.room, "bsky");
        assert_eq!(feed.url, DEFAULT_FEED_URL);

        let args = ServerArgs::try_parse_from(["chat_server", "--feed-room", ""]).unwrap();
        assert!(args.feed_config().is_none());
    }

    #[test]
    fn test_client_args() {
        let args = ClientArgs::try_parse_from(["chat_client", "alice", "localhost:9000"]).unwrap();
        assert_eq!(args.username, "alice");
        assert_eq!(args.server, "localhost:9000");
    }
}
