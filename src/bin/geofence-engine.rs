use std::net::SocketAddr;

use clap::Parser;
use geofence_engine::{Builder, Settings};
use tracing_subscriber::EnvFilter;

/// Geofencing engine server for the tourist-safety platform.
#[derive(Debug, Parser)]
#[command(name = "geofence-engine", version, about)]
struct Cli {
    /// Spatial-index primary address, host:port.
    #[arg(long, env = "GEOFENCE_PRIMARY_ADDR")]
    primary_addr: Option<SocketAddr>,

    /// Comma-separated spatial-index replica addresses.
    #[arg(long, env = "GEOFENCE_REPLICA_ADDRS")]
    replica_addrs: Option<String>,

    /// dev, test, or prod timeout profile.
    #[arg(long, env = "GEOFENCE_PROFILE")]
    profile: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if let Some(profile) = &cli.profile {
        std::env::set_var("GEOFENCE_PROFILE", profile);
    }
    if let Some(addr) = &cli.primary_addr {
        std::env::set_var("GEOFENCE_PRIMARY_ADDR", addr.to_string());
    }
    if let Some(replicas) = &cli.replica_addrs {
        std::env::set_var("GEOFENCE_REPLICA_ADDRS", replicas);
    }

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    tracing::info!(
        primary_addr = %settings.primary_addr,
        profile = ?settings.profile,
        "starting geofencing engine"
    );

    let orchestrator = match Builder::new(settings).build().await {
        Ok(o) => o,
        Err(e) => {
            tracing::error!(error = %e, "failed to start geofencing engine");
            std::process::exit(1);
        }
    };

    tracing::info!("geofencing engine ready");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install ctrl-c handler");
    }

    tracing::info!("shutdown signal received");
    orchestrator.shutdown().await;
}
