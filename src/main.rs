//! stream-gateway
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────┐
//!                 │                  STREAM GATEWAY                   │
//!   Client        │  ┌──────────┐   ┌───────────┐   ┌────────────┐   │
//!   ──────────────┼─▶│   net    │──▶│  tls      │──▶│ passthrough│───┼──▶ TLS backend
//!                 │  │ listener │   │  sniffer  │   └────────────┘   │
//!                 │  └──────────┘   └─────┬─────┘                    │
//!                 │                       ▼                          │
//!                 │  ┌──────────┐   ┌───────────┐   ┌────────────┐   │
//!   ◀─────────────┼──│  http    │◀──│  proxy    │──▶│  service   │───┼──▶ Backend
//!                 │  │  codec   │   │  bridge   │   │  targets   │   │
//!                 │  └──────────┘   └───────────┘   └────────────┘   │
//!                 │                                                  │
//!                 │  config · observability · admin · lifecycle      │
//!                 └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use stream_gateway::config::load_config;
use stream_gateway::lifecycle;
use stream_gateway::observability::logging;

#[derive(Debug, Parser)]
#[command(name = "stream-gateway", version, about = "Streaming HTTP gateway")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    logging::init(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        bind_address = %config.listener.bind_address,
        services = config.services.len(),
        "stream-gateway starting"
    );

    lifecycle::run(config).await?;
    Ok(())
}
