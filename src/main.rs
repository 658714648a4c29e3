//! rtcbridge - WebRTC polyfill bridge
//!
//! Serves the polyfill script and the WebSocket bridge that drives a native
//! media engine on behalf of the page.

use clap::Parser;
use rtcbridge_server::{bridge_url, BridgeServer, Config, LoopbackEngine};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rtcbridge")]
#[command(about = "WebRTC polyfill bridge server")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "RTCBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind, overriding the configuration
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // An explicit config file must load; otherwise defaults plus env overrides
    let mut config = match cli.config {
        Some(ref path) => match Config::from_file(path) {
            Ok(mut c) => {
                tracing::info!("Loaded config from {}", path.display());
                c.apply_env_overrides();
                c
            }
            Err(e) => {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
        },
        None => Config::from_env(),
    };
    if let Some(bind) = cli.bind {
        config.network.bind_addr = bind;
    }
    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    tracing::info!("Starting rtcbridge server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Bridge URL: {}", bridge_url(config.network.bind_addr));
    tracing::info!("  Polyfill path: {}", config.polyfill.path);
    match config.polyfill.script_file {
        Some(ref file) => tracing::info!("  Polyfill script: {}", file.display()),
        None => tracing::info!("  Polyfill script: stub"),
    }
    tracing::info!("  Media engine: loopback");

    let server = Arc::new(BridgeServer::new(config, Arc::new(LoopbackEngine::new()))?);

    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    server.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}
