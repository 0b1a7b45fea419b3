//! Terminal chat client
//!
//! Usage: `chat_client <username> <host:port>`

use clap::Parser;

use chat_router::config::ClientArgs;
use chat_router::logger::setup_logger;
use chat_router::terminal::run_client;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_logger(env!("CARGO_BIN_NAME"), "warn");

    let args = ClientArgs::parse();
    run_client(args).await?;

    Ok(())
}
