//! `TaskSync` hub -- live comment fan-out for task threads.
//!
//! Serves the REST write path under `/api` and a WebSocket endpoint at
//! `/hub`. Each accepted write is broadcast to every connection joined to
//! the task's group, including the writer's own.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8080
//! cargo run --bin tasksync-hub
//!
//! # Run on custom address
//! cargo run --bin tasksync-hub -- --bind 127.0.0.1:9090
//!
//! # Or via environment variable
//! TASKSYNC_HUB_ADDR=127.0.0.1:9090 cargo run --bin tasksync-hub
//! ```

use std::sync::Arc;

use clap::Parser;
use tasksync_hub::config::{HubCliArgs, HubConfig};
use tasksync_hub::hub::HubState;
use tasksync_hub::start_server_with_state;

#[tokio::main]
async fn main() {
    let cli = HubCliArgs::parse();

    let config = match HubConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting tasksync hub");

    let state = Arc::new(HubState::with_max_frame_size(config.max_frame_size));

    match start_server_with_state(&config.bind_addr.to_string(), state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "hub listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "hub server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start hub");
            std::process::exit(1);
        }
    }
}
