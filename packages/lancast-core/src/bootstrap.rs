//! Application bootstrap and dependency wiring.
//!
//! This module is the composition root: every component is created here and
//! handed to [`CastService`]. Nothing starts running until
//! [`CastService::start`] is called.

use std::sync::Arc;

use reqwest::Client;
use tokio::sync::broadcast;

use crate::artwork::ArtworkStore;
use crate::context::IpDetector;
use crate::error::{LancastError, LancastResult};
use crate::events::BroadcastEvent;
use crate::playback::PlaybackController;
use crate::protocol_constants::USER_AGENT;
use crate::proxy::StreamProxyServer;
use crate::services::CastService;
use crate::state::{Config, DeviceRegistry};
use crate::upnp::{SoapAvTransport, SoapClient, SsdpDiscoverer};

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Casting facade used by the API layer.
    pub cast: Arc<CastService>,
    /// Renderers seen by discovery or probing.
    pub registry: Arc<DeviceRegistry>,
    /// Logo cache served by the proxy.
    pub artwork: Arc<ArtworkStore>,
    /// Broadcast channel sender for real-time events.
    pub broadcast_tx: broadcast::Sender<BroadcastEvent>,
    /// Shared HTTP client for connection pooling.
    http_client: Client,
}

impl BootstrappedServices {
    /// Returns the shared HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Stops discovery, releases playback and closes the proxy.
    pub fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning shutdown...");
        self.cast.shutdown();
        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Creates and wires all services.
///
/// # Errors
///
/// Returns [`LancastError::Configuration`] if `config` fails validation and
/// [`LancastError::Internal`] if an HTTP client cannot be built.
pub fn bootstrap_services(
    config: &Config,
    detector: Arc<dyn IpDetector>,
) -> LancastResult<BootstrappedServices> {
    config.validate().map_err(LancastError::Configuration)?;

    // Shared client for descriptions, SOAP and logo downloads. Stream
    // relaying uses the proxy's own client with long read timeouts.
    let http_client = Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| LancastError::Internal(format!("Failed to build HTTP client: {e}")))?;

    let discoverer = Arc::new(SsdpDiscoverer::new(
        config.ssdp_config(),
        http_client.clone(),
    ));
    let registry = Arc::new(DeviceRegistry::new());

    let transport = Arc::new(SoapAvTransport::new(
        SoapClient::new(http_client.clone()),
        config.soap_timeouts(),
    ));
    let controller = Arc::new(PlaybackController::new(
        transport,
        config.watchdog_config(),
    ));

    let artwork = Arc::new(ArtworkStore::new());
    let proxy = Arc::new(StreamProxyServer::new(
        config.proxy_config(),
        detector,
        Arc::clone(&artwork),
    )?);

    let (broadcast_tx, _) = broadcast::channel(config.event_channel_capacity);

    let cast = Arc::new(CastService::new(
        discoverer,
        Arc::clone(&registry),
        controller,
        proxy,
        http_client.clone(),
        config.description_timeout(),
        broadcast_tx.clone(),
    ));

    log::info!("[Bootstrap] Services wired");

    Ok(BootstrappedServices {
        cast,
        registry,
        artwork,
        broadcast_tx,
        http_client,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FixedIpDetector;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn rejects_invalid_config() {
        let config = Config {
            event_channel_capacity: 0,
            ..Default::default()
        };
        let detector = FixedIpDetector::arc(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let result = bootstrap_services(&config, detector);
        assert!(matches!(result, Err(LancastError::Configuration(_))));
    }

    #[tokio::test]
    async fn wires_shared_channels() {
        let services = bootstrap_services(
            &Config::default(),
            FixedIpDetector::arc(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        )
        .unwrap();

        assert!(services.registry.is_empty());
        assert!(!services.artwork.has_logo());
        assert_eq!(services.broadcast_tx.receiver_count(), 0);

        let _rx = services.cast.subscribe();
        assert_eq!(services.broadcast_tx.receiver_count(), 1);

        let snapshot = services.cast.snapshot();
        assert_eq!(snapshot.device_count, 0);
        assert!(snapshot.proxy.is_none());
        services.shutdown();
    }
}
