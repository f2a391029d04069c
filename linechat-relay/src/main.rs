//! linechat relay server: line-oriented TCP broadcast chat.
//!
//! Every connected client picks a nickname, then each line it sends is
//! relayed to all other connected clients.
//!
//! # Usage
//!
//! ```bash
//! # Run on the default port 8080
//! cargo run --bin linechat-relay
//!
//! # Run on a custom port
//! cargo run --bin linechat-relay -- --port 9090
//!
//! # Or via environment variable
//! LINECHAT_PORT=9090 cargo run --bin linechat-relay
//! ```

use clap::Parser;
use linechat_relay::config::{RelayCliArgs, RelayConfig};
use linechat_relay::server::Server;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let server = match Server::with_config(config) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "invalid server configuration");
            std::process::exit(1);
        }
    };

    tracing::info!(port = server.port(), "starting linechat relay server");

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("received Ctrl-C");
                shutdown.shutdown();
            }
            Err(e) => tracing::error!(error = %e, "failed to listen for Ctrl-C"),
        }
    });

    if let Err(e) = server.launch().await {
        tracing::error!(error = %e, "relay server failed");
        std::process::exit(1);
    }
}
