use anyhow::{Context, Result};
use clap::Parser;
use lan_tunnel::cli::Cli;
use lan_tunnel::client;
use lan_tunnel::config::ClientConfig;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity level
    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(false)
        .init();

    info!(
        "lan-tunnel v{} - expose a local server behind a NAT or firewall to the internet",
        env!("CARGO_PKG_VERSION")
    );

    let config = ClientConfig::from_cli(&cli).context("Failed to load configuration")?;
    info!("Relay server: {}", config.relay_addr());

    client::run_client(config)
        .await
        .context("Client terminated")?;

    Ok(())
}
