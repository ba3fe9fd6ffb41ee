//! Huddle relay: WebSocket signaling server for browser video calls.
//!
//! Browsers connect, join the shared room with a display name, and exchange
//! `offer` / `answer` / `ice` messages through the relay until their direct
//! peer connections are up. Media never passes through the relay.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:3000
//! cargo run --bin huddle-relay
//!
//! # Run on custom address
//! cargo run --bin huddle-relay -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! HUDDLE_ADDR=127.0.0.1:8080 cargo run --bin huddle-relay
//! ```

use std::sync::Arc;

use clap::Parser;
use huddle_relay::config::{RelayCliArgs, RelayConfig};
use huddle_relay::relay::{self, RelayState};

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

    tracing::info!(addr = %config.bind_addr, "starting huddle relay");

    let state = Arc::new(RelayState::from_config(&config));

    let (bound_addr, mut handle) =
        match relay::start_server_with_state(&config.bind_addr, Arc::clone(&state)).await {
            Ok(started) => started,
            Err(e) => {
                tracing::error!(error = %e, "failed to start relay");
                std::process::exit(1);
            }
        };
    tracing::info!(addr = %bound_addr, "relay listening");

    tokio::select! {
        result = &mut handle => {
            if let Err(e) = result {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            let closed = state.room.close_all();
            tracing::info!(closed, "shutting down");
            // Let writers flush their close frames.
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            handle.abort();
        }
    }
}
