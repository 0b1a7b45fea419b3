//! Logging setup shared by the server and client binaries

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` overrides the default, e.g. `RUST_LOG=debug` or
/// `RUST_LOG=chat_router=trace`. Logs go to stderr so the terminal
/// client's chat output on stdout stays clean.
pub fn setup_logger(binary_name: &str, default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={},{}={}",
            env!("CARGO_PKG_NAME").replace('-', "_"),
            default_level,
            binary_name,
            default_level
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
