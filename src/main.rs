//! Typing relay - Entry Point
//!
//! Loads configuration, starts the session reaper and the WebSocket
//! listener, and drains running sessions on Ctrl-C.

use std::env;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use typing_relay::{handle_connection, Config, TypingService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=typing_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("typing_relay=info")),
        )
        .init();

    let mut config = Config::from_env()?;

    // Bind address from command line wins over the environment
    if let Some(addr) = env::args().nth(1) {
        config.bind_addr = addr;
    }

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Typing relay listening on {}", config.bind_addr);

    let service = TypingService::new(config);
    let reaper = service.spawn_reaper();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("New connection from {}", addr);
                    let service = service.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, service).await {
                            error!("Connection handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    reaper.abort();
    service.shutdown().await;
    info!("Typing relay stopped");

    Ok(())
}
