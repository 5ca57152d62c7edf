//! Price relay server entry point

use anyhow::Context;
use clap::Parser;
use price_relay::{RelayConfig, RelayServer};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(long)]
    bind_address: Option<String>,

    /// Port
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum downstream connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Upstream streaming endpoint
    #[arg(long)]
    ws_url: Option<String>,

    /// Upstream REST endpoint used for symbol lookup
    #[arg(long)]
    hermes_url: Option<String>,

    /// Enable or disable CORS
    #[arg(long)]
    cors: Option<bool>,

    /// Symbols subscribed upstream at start, comma separated
    #[arg(long, value_delimiter = ',')]
    symbols: Option<Vec<String>>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn apply(self, mut config: RelayConfig) -> RelayConfig {
        if let Some(bind_address) = self.bind_address {
            config.bind_address = bind_address;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max_connections) = self.max_connections {
            config.max_connections = max_connections;
        }
        if let Some(ws_url) = self.ws_url {
            config.upstream.websocket_url = ws_url;
        }
        if let Some(hermes_url) = self.hermes_url {
            config.upstream.hermes_url = hermes_url;
        }
        if let Some(cors) = self.cors {
            config.enable_cors = cors;
        }
        if let Some(symbols) = self.symbols {
            config.initial_symbols = symbols;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "price_relay=info,pyth_adapter=info,relay_core=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = Args::parse();
    let print_config = args.print_config;
    let config_path = args.config.take();

    let config = RelayConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    let config = args.apply(config);
    config.validate().context("Invalid configuration")?;

    if print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    info!("Starting price relay");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {:?}", config);

    let mut server = RelayServer::new(config).context("Failed to build relay server")?;

    // Handle shutdown gracefully
    let shutdown_signal = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for CTRL+C: {}", e),
        }
    };

    if let Err(e) = server.run(shutdown_signal).await {
        error!("Price relay error: {}", e);
        return Err(e.into());
    }

    info!("Price relay stopped");
    Ok(())
}
