//! Line chat server - Entry Point
//!
//! Parses configuration, binds the listener and serves until Ctrl-C.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use line_chat_server::{Listener, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Without RUST_LOG only this crate logs, at info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("line_chat_server=info")),
        )
        .init();

    let config = ServerConfig::parse();

    let listener = match Listener::bind(&config).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Cannot start server: {}", e);
            return Err(e.into());
        }
    };
    info!(
        "Chat server listening on {} (max {} connections)",
        listener.local_addr()?,
        config.max_connections
    );

    tokio::select! {
        _ = listener.run() => {}
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("Shutting down");
        }
    }

    Ok(())
}
