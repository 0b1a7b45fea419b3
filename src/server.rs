//! TCP front door
//!
//! Accepts connections and spawns one session handler task per socket
//! until the shutdown token fires.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::handler::{handle_connection, SessionConfig};
use crate::registry::Registry;

/// Listener plus everything a new session needs
pub struct ChatServer {
    listener: TcpListener,
    registry: Registry,
    session: SessionConfig,
}

impl ChatServer {
    pub fn new(listener: TcpListener, registry: Registry, session: SessionConfig) -> Self {
        Self {
            listener,
            registry,
            session,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Server shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.spawn_session(stream, addr),
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream, addr: SocketAddr) {
        info!("New connection from {}", addr);
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
        }

        let registry = self.registry.clone();
        let config = self.session.clone();

        // Spawn handler task for each connection
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, Some(addr), registry, config).await {
                warn!("Session from {} ended: {}", addr, e);
            }
        });
    }
}
