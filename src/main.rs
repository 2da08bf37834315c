use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use hls_relay::{AppConfig, RelayServer, SessionRegistry};

/// Relay live HLS streams over HTTP, one upstream pull per stream
#[derive(Debug, Parser)]
#[command(name = "hls-relay", version, about)]
struct Cli {
    /// Config file path
    #[arg(short, long, env = "HLS_RELAY_CONFIG", default_value = "config.yml")]
    config: PathBuf,

    /// Server host (overrides config, default: 0.0.0.0)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides config, default: 8080)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = AppConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?
        .host(cli.host)
        .port(cli.port);

    let definitions = config.stream_definitions()?;
    if definitions.is_empty() {
        tracing::warn!("No streams configured in config file");
    }
    for def in &definitions {
        tracing::info!(stream = %def.name, url = %def.source_url, "Stream available");
    }

    let registry = SessionRegistry::new(
        definitions,
        Arc::new(config.streamlink_source()),
        config.producer_options()?,
        config.registry_config()?,
    );

    let server = RelayServer::new(config.server_config()?, registry);
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("relay server failed")?;

    Ok(())
}
