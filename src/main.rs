//! Chat router server - entry point
//!
//! Binds the TCP listener, starts the registry actor and the optional
//! feed bridge, and accepts connections until Ctrl-C.

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use chat_router::config::ServerArgs;
use chat_router::feed::{FeedBridge, JetstreamConnector};
use chat_router::logger::setup_logger;
use chat_router::{ChatServer, Registry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG to control log level,
    // e.g. RUST_LOG=debug or RUST_LOG=chat_router=trace
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = ServerArgs::parse();

    // Both ring and aws-lc may be linked in; pick one explicitly
    let _ = rustls::crypto::ring::default_provider().install_default();

    let addr = args.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("Chat router listening on {}", addr);

    let registry = Registry::spawn();
    info!("Registry actor started");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        signal.cancel();
    });

    let feed = args.feed_config().map(|config| {
        info!("Bridging {} into room '{}'", config.url, config.room);
        let connector = JetstreamConnector::new(config.url.clone());
        let bridge = FeedBridge::new(connector, registry.clone(), config);
        tokio::spawn(bridge.run(shutdown.child_token()))
    });

    ChatServer::new(listener, registry, args.session_config())
        .run(shutdown)
        .await;

    if let Some(feed) = feed {
        let _ = feed.await;
    }

    Ok(())
}
