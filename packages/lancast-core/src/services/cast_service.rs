//! Casting facade: discovery results in, playback on a renderer out.
//!
//! [`CastService`] composes the components into the end-to-end flow: a
//! device is picked from the registry, the caller's stream URL is rewritten
//! through the local proxy, and the playback controller pushes the proxied
//! URL to the renderer. Discovery and playback events are re-published on a
//! single broadcast channel for API clients.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{LancastError, LancastResult};
use crate::events::{BroadcastEvent, DiscoveryEvent};
use crate::playback::{PlaybackController, PlaybackState};
use crate::proxy::{ProxyEndpoint, StreamProxyServer};
use crate::state::DeviceRegistry;
use crate::upnp::{probe_device, DiscoveredDevice, SsdpDiscoverer, StreamMetadata};

/// A cast request as sent by API clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastRequest {
    /// Identity of a registered renderer.
    pub uuid: String,
    /// Origin stream URL, HTTP or HTTPS.
    pub url: String,
    /// Station title. When set, DIDL-Lite metadata is offered to the renderer.
    #[serde(default)]
    pub title: Option<String>,
    /// Image to serve as `/logo.jpg` for this session.
    #[serde(default)]
    pub logo_url: Option<String>,
}

/// Outcome of a successful cast.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CastOutcome {
    pub session_id: String,
    pub device: DiscoveredDevice,
    /// The proxied URL the renderer pulls from.
    pub stream_url: String,
}

/// Point-in-time view of the service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CastSnapshot {
    pub state: PlaybackState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DiscoveredDevice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub watchdog_active: bool,
    pub discovering: bool,
    pub device_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySnapshot>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySnapshot {
    pub local_ip: String,
    pub port: u16,
    /// Set once a logo has been installed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
}

pub struct CastService {
    discoverer: Arc<SsdpDiscoverer>,
    registry: Arc<DeviceRegistry>,
    controller: Arc<PlaybackController>,
    proxy: Arc<StreamProxyServer>,
    http_client: Client,
    description_timeout: Duration,
    broadcast_tx: broadcast::Sender<BroadcastEvent>,
    cancel: CancellationToken,
    playback_forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl CastService {
    /// Creates a new CastService.
    ///
    /// Background work starts with [`start`](Self::start).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        discoverer: Arc<SsdpDiscoverer>,
        registry: Arc<DeviceRegistry>,
        controller: Arc<PlaybackController>,
        proxy: Arc<StreamProxyServer>,
        http_client: Client,
        description_timeout: Duration,
        broadcast_tx: broadcast::Sender<BroadcastEvent>,
    ) -> Self {
        Self {
            discoverer,
            registry,
            controller,
            proxy,
            http_client,
            description_timeout,
            broadcast_tx,
            cancel: CancellationToken::new(),
            playback_forwarder: Mutex::new(None),
        }
    }

    /// Starts the proxy and begins re-publishing playback events.
    pub async fn start(&self) -> LancastResult<ProxyEndpoint> {
        let endpoint = self.proxy.start().await?;

        let mut forwarder = self.playback_forwarder.lock();
        if forwarder.is_none() {
            let rx = self.controller.subscribe();
            *forwarder = Some(tokio::spawn(forward_playback_events(
                rx,
                self.broadcast_tx.clone(),
                self.cancel.child_token(),
            )));
        }
        Ok(endpoint)
    }

    /// Subscribes to discovery and playback events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.broadcast_tx.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Devices
    // ─────────────────────────────────────────────────────────────────────────

    /// Starts a discovery session, cancelling any running one.
    ///
    /// Devices from earlier sessions and probes are forgotten; found devices
    /// are registered as they arrive.
    pub fn start_discovery(&self) {
        log::info!("[Cast] Starting discovery");
        self.registry.clear();
        let rx = self.discoverer.start_discovery();
        tokio::spawn(forward_discovery_events(
            rx,
            Arc::clone(&self.registry),
            self.broadcast_tx.clone(),
        ));
    }

    pub fn stop_discovery(&self) {
        self.discoverer.stop_discovery();
    }

    #[must_use]
    pub fn is_discovering(&self) -> bool {
        self.discoverer.is_running()
    }

    #[must_use]
    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        self.registry.list()
    }

    #[must_use]
    pub fn device(&self, uuid: &str) -> Option<DiscoveredDevice> {
        self.registry.get(uuid)
    }

    /// Fetches one description URL directly and registers the renderer.
    pub async fn probe(&self, location: &str) -> LancastResult<DiscoveredDevice> {
        let device = probe_device(&self.http_client, location, self.description_timeout).await?;
        log::info!(
            "[Cast] Probed {} at {} ({})",
            device.friendly_name,
            device.location,
            device.uuid
        );
        if self.registry.upsert(device.clone()) {
            let _ = self.broadcast_tx.send(BroadcastEvent::Discovery(
                DiscoveryEvent::device_found(device.clone()),
            ));
        }
        Ok(device)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Playback
    // ─────────────────────────────────────────────────────────────────────────

    /// Rewrites the stream through the proxy and plays it on the device.
    pub async fn cast(&self, request: CastRequest) -> LancastResult<CastOutcome> {
        let device = self
            .registry
            .get(&request.uuid)
            .ok_or_else(|| LancastError::DeviceNotFound(request.uuid.clone()))?;

        if !is_http_url(&request.url) {
            return Err(LancastError::InvalidRequest(format!(
                "stream url must be http or https: {}",
                request.url
            )));
        }

        let endpoint = self.start().await?;
        let urls = endpoint.urls();
        let stream_url = urls.stream_url(&request.url);

        if let Some(logo_url) = &request.logo_url {
            // A missing logo never blocks playback. The previous station's
            // logo must not be advertised for this one.
            let artwork = self.proxy.artwork();
            if let Err(e) = artwork.set_logo_from_url(&self.http_client, logo_url).await {
                log::warn!("[Cast] Logo not updated, clearing: {}", e);
                artwork.clear();
            }
        }

        match &request.title {
            Some(title) => {
                let mut metadata = StreamMetadata::titled(title.clone());
                if self.proxy.artwork().has_logo() {
                    metadata.artwork_url = Some(urls.logo_url());
                }
                self.controller
                    .play_with_metadata(device.clone(), &stream_url, &metadata)
                    .await?;
            }
            None => self.controller.play(device.clone(), &stream_url).await?,
        }

        Ok(CastOutcome {
            session_id: self.controller.session_id(),
            device,
            stream_url,
        })
    }

    /// Stops playback on the current session's device.
    pub async fn stop(&self) -> LancastResult<()> {
        let device = self
            .controller
            .current_device()
            .ok_or(LancastError::NoActiveSession)?;
        self.controller.stop(&device).await?;
        Ok(())
    }

    #[must_use]
    pub fn snapshot(&self) -> CastSnapshot {
        let session_id = self.controller.session_id();
        CastSnapshot {
            state: self.controller.state(),
            device: self.controller.current_device(),
            session_id: (!session_id.is_empty()).then_some(session_id),
            watchdog_active: self.controller.watchdog_active(),
            discovering: self.discoverer.is_running(),
            device_count: self.registry.len(),
            proxy: self.proxy.endpoint().map(|e| ProxySnapshot {
                logo_url: self
                    .proxy
                    .artwork()
                    .has_logo()
                    .then(|| e.urls().logo_url()),
                local_ip: e.local_ip,
                port: e.port,
            }),
        }
    }

    #[must_use]
    pub fn proxy(&self) -> &Arc<StreamProxyServer> {
        &self.proxy
    }

    #[must_use]
    pub fn controller(&self) -> &Arc<PlaybackController> {
        &self.controller
    }

    /// Cancels discovery, releases the controller and stops the proxy.
    ///
    /// Sends nothing to the renderer.
    pub fn shutdown(&self) {
        log::info!("[Cast] Shutting down");
        self.discoverer.stop_discovery();
        self.controller.release();
        self.proxy.stop();
        self.cancel.cancel();
        if let Some(handle) = self.playback_forwarder.lock().take() {
            handle.abort();
        }
    }
}

fn is_http_url(s: &str) -> bool {
    url::Url::parse(s)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

async fn forward_discovery_events(
    mut rx: mpsc::Receiver<DiscoveryEvent>,
    registry: Arc<DeviceRegistry>,
    tx: broadcast::Sender<BroadcastEvent>,
) {
    while let Some(event) = rx.recv().await {
        match &event {
            DiscoveryEvent::DeviceFound { device, .. } => {
                registry.upsert(device.clone());
            }
            DiscoveryEvent::Error { message, .. } => {
                log::warn!("[Cast] Discovery error: {}", message);
            }
            DiscoveryEvent::Finished {
                found, cancelled, ..
            } => {
                log::info!(
                    "[Cast] Discovery finished: {} found{}",
                    found,
                    if *cancelled { " (cancelled)" } else { "" }
                );
            }
        }
        let _ = tx.send(BroadcastEvent::Discovery(event));
    }
}

async fn forward_playback_events(
    mut rx: broadcast::Receiver<crate::events::PlaybackEvent>,
    tx: broadcast::Sender<BroadcastEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            r = rx.recv() => r,
        };
        match event {
            Ok(event) => {
                let _ = tx.send(BroadcastEvent::Playback(event));
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                log::warn!("[Cast] Dropped {} playback events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artwork::ArtworkStore;
    use crate::context::FixedIpDetector;
    use crate::playback::WatchdogConfig;
    use crate::proxy::ProxyConfig;
    use crate::upnp::{AvTransport, SoapResult, SsdpConfig, TransportState};
    use async_trait::async_trait;
    use std::net::{IpAddr, Ipv4Addr};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingTransport {
        uris: parking_lot::Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl AvTransport for RecordingTransport {
        async fn set_av_transport_uri(
            &self,
            _device: &DiscoveredDevice,
            uri: &str,
            metadata: &str,
        ) -> SoapResult<()> {
            self.uris.lock().push((uri.to_string(), metadata.to_string()));
            Ok(())
        }

        async fn play(&self, _device: &DiscoveredDevice) -> SoapResult<()> {
            Ok(())
        }

        async fn stop(&self, _device: &DiscoveredDevice) -> SoapResult<()> {
            Ok(())
        }

        async fn get_transport_info(&self, _device: &DiscoveredDevice) -> SoapResult<TransportState> {
            Ok(TransportState::Playing)
        }
    }

    fn service(transport: Arc<RecordingTransport>) -> CastService {
        let client = Client::new();
        let proxy = StreamProxyServer::new(
            ProxyConfig {
                bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                ..Default::default()
            },
            FixedIpDetector::arc(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            Arc::new(ArtworkStore::new()),
        )
        .unwrap();
        let (tx, _) = broadcast::channel(32);
        CastService::new(
            Arc::new(SsdpDiscoverer::new(SsdpConfig::default(), client.clone())),
            Arc::new(DeviceRegistry::new()),
            Arc::new(PlaybackController::new(transport, WatchdogConfig::default())),
            Arc::new(proxy),
            client,
            Duration::from_secs(2),
            tx,
        )
    }

    fn renderer_description() -> &'static str {
        r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>Bedroom Radio</friendlyName>
    <UDN>uuid:radio-1</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:AVTransport</serviceId>
        <controlURL>/upnp/control/AVTransport1</controlURL>
      </service>
    </serviceList>
  </device>
</root>"#
    }

    async fn registered(service: &CastService) -> (MockServer, DiscoveredDevice) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/desc.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(renderer_description()))
            .mount(&server)
            .await;
        let device = service
            .probe(&format!("{}/desc.xml", server.uri()))
            .await
            .unwrap();
        (server, device)
    }

    #[tokio::test]
    async fn probe_registers_device_and_broadcasts() {
        let service = service(Arc::default());
        let mut rx = service.subscribe();

        let (_server, device) = registered(&service).await;

        assert_eq!(device.uuid, "uuid:radio-1");
        assert_eq!(service.devices(), vec![device.clone()]);
        assert!(matches!(
            rx.try_recv().unwrap(),
            BroadcastEvent::Discovery(DiscoveryEvent::DeviceFound { .. })
        ));
    }

    #[tokio::test]
    async fn cast_unknown_device_is_not_found() {
        let service = service(Arc::default());
        let err = service
            .cast(CastRequest {
                uuid: "uuid:nope".into(),
                url: "https://r.example/live".into(),
                title: None,
                logo_url: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LancastError::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn cast_pushes_proxied_url_without_metadata() {
        let transport = Arc::new(RecordingTransport::default());
        let service = service(Arc::clone(&transport));
        let (_server, device) = registered(&service).await;

        let outcome = service
            .cast(CastRequest {
                uuid: device.uuid.clone(),
                url: "https://r.example/live?x=1".into(),
                title: None,
                logo_url: None,
            })
            .await
            .unwrap();

        let port = service.proxy().endpoint().unwrap().port;
        assert_eq!(
            outcome.stream_url,
            format!(
                "http://127.0.0.1:{}/stream?url=https%3A%2F%2Fr.example%2Flive%3Fx%3D1",
                port
            )
        );
        assert_eq!(
            transport.uris.lock().clone(),
            vec![(outcome.stream_url.clone(), String::new())]
        );

        let snapshot = service.snapshot();
        assert_eq!(snapshot.state, PlaybackState::Playing);
        assert!(snapshot.watchdog_active);
        assert_eq!(snapshot.session_id.as_deref(), Some(outcome.session_id.as_str()));

        service.stop().await.unwrap();
        assert_eq!(service.snapshot().state, PlaybackState::Stopped);
        service.shutdown();
    }

    #[tokio::test]
    async fn cast_with_title_sends_didl() {
        let transport = Arc::new(RecordingTransport::default());
        let service = service(Arc::clone(&transport));
        let (_server, device) = registered(&service).await;

        service
            .cast(CastRequest {
                uuid: device.uuid,
                url: "http://r.example/live".into(),
                title: Some("Jazz FM".into()),
                logo_url: None,
            })
            .await
            .unwrap();

        let (_, metadata) = transport.uris.lock()[0].clone();
        assert!(metadata.contains("<dc:title>Jazz FM</dc:title>"));
        assert!(!metadata.contains("albumArtURI"));
        service.shutdown();
    }

    #[tokio::test]
    async fn failed_logo_download_clears_previous_logo() {
        let transport = Arc::new(RecordingTransport::default());
        let service = service(Arc::clone(&transport));
        let (server, device) = registered(&service).await;
        Mock::given(method("GET"))
            .and(path("/logo.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        service
            .proxy()
            .artwork()
            .set_logo(vec![0xFF, 0xD8, 0xFF, 0xD9])
            .unwrap();

        service
            .cast(CastRequest {
                uuid: device.uuid,
                url: "http://r.example/live".into(),
                title: Some("Talk Radio".into()),
                logo_url: Some(format!("{}/logo.png", server.uri())),
            })
            .await
            .unwrap();

        assert!(!service.proxy().artwork().has_logo());
        let (_, metadata) = transport.uris.lock()[0].clone();
        assert!(metadata.contains("<dc:title>Talk Radio</dc:title>"));
        assert!(!metadata.contains("albumArtURI"));
        assert!(service.snapshot().proxy.unwrap().logo_url.is_none());
        service.shutdown();
    }

    #[tokio::test]
    async fn new_discovery_session_forgets_earlier_devices() {
        let service = service(Arc::default());
        let (_server, device) = registered(&service).await;
        assert!(service.device(&device.uuid).is_some());

        service.start_discovery();

        assert!(service.devices().is_empty());
        assert!(service.device(&device.uuid).is_none());
        let err = service
            .cast(CastRequest {
                uuid: device.uuid,
                url: "http://r.example/live".into(),
                title: None,
                logo_url: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LancastError::DeviceNotFound(_)));
        service.stop_discovery();
    }

    #[tokio::test]
    async fn cast_rejects_non_http_stream() {
        let service = service(Arc::default());
        let (_server, device) = registered(&service).await;
        let err = service
            .cast(CastRequest {
                uuid: device.uuid,
                url: "ftp://r.example/live".into(),
                title: None,
                logo_url: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LancastError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn stop_without_session_conflicts() {
        let service = service(Arc::default());
        assert!(matches!(
            service.stop().await,
            Err(LancastError::NoActiveSession)
        ));
    }

    #[tokio::test]
    async fn playback_events_are_republished() {
        let transport = Arc::new(RecordingTransport::default());
        let service = service(Arc::clone(&transport));
        let (_server, device) = registered(&service).await;
        let mut rx = service.subscribe();

        service
            .cast(CastRequest {
                uuid: device.uuid,
                url: "http://r.example/live".into(),
                title: None,
                logo_url: None,
            })
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(BroadcastEvent::Playback(e)) = rx.recv().await {
                    return e;
                }
            }
        })
        .await
        .unwrap();
        assert!(!event.session_id().is_empty());
        service.shutdown();
    }
}
