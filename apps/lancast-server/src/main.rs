//! LanCast Server - standalone headless casting server.
//!
//! Discovers UPnP/DLNA renderers on the LAN and exposes the local control
//! API for casting HTTP audio streams to them through the built-in proxy.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use lancast_core::{
    bootstrap_services, start_server, AppState, FixedIpDetector, IpDetector, LocalIpDetector,
};
use tokio::signal;

use crate::config::ServerConfig;

/// LanCast Server - cast network audio streams to UPnP/DLNA renderers.
#[derive(Parser, Debug)]
#[command(name = "lancast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "LANCAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Control API port (overrides config file).
    #[arg(short = 'p', long, env = "LANCAST_API_PORT")]
    port: Option<u16>,

    /// Advertise IP address (overrides config file).
    #[arg(short = 'a', long, env = "LANCAST_ADVERTISE_IP")]
    advertise_ip: Option<std::net::IpAddr>,

    /// Image served to renderers as the station logo.
    #[arg(long, value_name = "FILE", env = "LANCAST_LOGO_PATH")]
    logo: Option<PathBuf>,

    /// Do not start a discovery session at startup.
    #[arg(long)]
    no_discovery: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("LanCast Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.api_port = port;
    }
    if let Some(ip) = args.advertise_ip {
        config.advertise_ip = Some(ip);
    }
    if let Some(logo) = args.logo {
        config.logo_path = Some(logo);
    }
    if args.no_discovery {
        config.discover_on_start = false;
    }

    let detector: Arc<dyn IpDetector> = if let Some(ip) = config.advertise_ip {
        log::info!(
            "Configuration: api_port={}, advertise_ip={}",
            config.api_port,
            ip
        );
        FixedIpDetector::arc(ip)
    } else {
        log::info!("Configuration: api_port={}, advertise_ip=auto", config.api_port);
        LocalIpDetector::arc()
    };

    let core_config = config.to_core_config();
    let services =
        bootstrap_services(&core_config, detector).context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    let endpoint = services.cast.start().await.context(
        "Failed to start the stream proxy. \
         Please specify --advertise-ip or set LANCAST_ADVERTISE_IP to an address \
         that renderers can reach.",
    )?;
    log::info!("Stream proxy on {}:{}", endpoint.local_ip, endpoint.port);

    if let Some(ref path) = config.logo_path {
        match services.artwork.load_logo_file(path) {
            Ok(()) => log::info!("Logo loaded from {}", path.display()),
            Err(e) => log::warn!("Logo not loaded: {}", e),
        }
    }

    if config.discover_on_start {
        services.cast.start_discovery();
    }

    let app_state = AppState::new(Arc::clone(&services.cast), core_config);
    let mut server_handle = tokio::spawn(start_server(app_state));

    tokio::select! {
        _ = shutdown_signal() => {
            log::info!("Shutdown signal received, cleaning up...");
        }
        result = &mut server_handle => {
            match result {
                Ok(Ok(())) => log::warn!("HTTP server exited"),
                Ok(Err(e)) => log::error!("Server error: {}", e),
                Err(e) => log::error!("Server task failed: {}", e),
            }
        }
    }

    services.shutdown();
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
