//! SSDP-based MediaRenderer discovery.
//!
//! A discovery session sends a fixed number of M-SEARCH rounds to
//! 239.255.255.250:1900, listens for unicast replies after each round,
//! deduplicates replies by device identity and fetches each new device's
//! description. Results are delivered as [`DiscoveryEvent`]s on a channel
//! that always ends with exactly one [`DiscoveryEvent::Finished`].
//!
//! The dedup set lives inside the session task and is never shared.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use super::description::{self, resolve_url, DeviceDescription};
use super::types::{uuid_from_usn, DiscoveredDevice, DiscoveryError, DiscoveryResult};
use crate::events::DiscoveryEvent;
use crate::protocol_constants::{
    AV_TRANSPORT_KEYWORD, DEFAULT_AV_TRANSPORT_SERVICE, MEDIA_RENDERER_SEARCH_TARGET,
    SSDP_MULTICAST_ADDR, SSDP_MULTICAST_TTL, SSDP_RECV_BUFFER_SIZE,
};
use crate::utils::host_of;

/// Capacity of the per-session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 32;

// ─────────────────────────────────────────────────────────────────────────────
// Wire Format
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the trimmed value of the first header named `name`.
///
/// Header names are ASCII, so the comparison is byte-level case-insensitive.
fn header_value<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    response.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
            .filter(|v| !v.is_empty())
    })
}

/// Build the M-SEARCH message.
fn build_msearch_message(mx: u64) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\r\n",
        SSDP_MULTICAST_ADDR, mx, MEDIA_RENDERER_SEARCH_TARGET
    )
}

/// The two headers a reply must carry to be useful.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SsdpReply {
    location: String,
    uuid: String,
}

/// Parses an SSDP reply.
///
/// Returns `None` for replies without a LOCATION. A missing USN falls back to
/// the LOCATION as the device identity.
fn parse_ssdp_response(response: &str) -> Option<SsdpReply> {
    let location = header_value(response, "location")?.to_string();
    let uuid = header_value(response, "usn")
        .map(uuid_from_usn)
        .unwrap_or_else(|| location.clone());
    Some(SsdpReply { location, uuid })
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for SSDP discovery.
#[derive(Debug, Clone)]
pub struct SsdpConfig {
    /// Number of M-SEARCH rounds.
    pub rounds: u32,
    /// MX value (max response delay in seconds).
    pub mx: u64,
    /// How long to listen for replies after each M-SEARCH.
    pub listen_window: Duration,
    /// Pause between rounds.
    pub round_delay: Duration,
    /// Timeout for each description fetch.
    pub description_timeout: Duration,
    /// Interface to send from; `None` lets the OS choose.
    pub interface: Option<Ipv4Addr>,
}

impl Default for SsdpConfig {
    fn default() -> Self {
        Self {
            rounds: 3,
            mx: 1,
            listen_window: Duration::from_millis(1000),
            round_delay: Duration::from_millis(1000),
            description_timeout: Duration::from_secs(4),
            interface: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Socket
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the UDP socket used for both M-SEARCH and replies.
///
/// Devices reply unicast to the sending port, so one socket serves both.
fn create_socket(interface: Option<Ipv4Addr>) -> Result<UdpSocket, DiscoveryError> {
    let iface_ip = interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
    let bind_addr = SocketAddr::new(IpAddr::V4(iface_ip), 0);

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(DiscoveryError::SocketBind)?;

    if let Err(e) = socket.set_reuse_address(true) {
        log::warn!("[SSDP] Failed to set SO_REUSEADDR: {}", e);
    }

    if let Err(e) = socket.set_multicast_ttl_v4(SSDP_MULTICAST_TTL) {
        log::warn!("[SSDP] Failed to set multicast TTL: {}", e);
    }

    if let Some(ip) = interface {
        if let Err(e) = socket.set_multicast_if_v4(&ip) {
            log::warn!("[SSDP] Failed to select multicast interface {}: {}", ip, e);
        }
    }

    socket
        .set_nonblocking(true)
        .map_err(DiscoveryError::SocketBind)?;

    socket
        .bind(&bind_addr.into())
        .map_err(DiscoveryError::SocketBind)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(DiscoveryError::SocketBind)
}

// ─────────────────────────────────────────────────────────────────────────────
// Description Fetch
// ─────────────────────────────────────────────────────────────────────────────

/// Turns a parsed description into a [`DiscoveredDevice`].
///
/// Rejects documents that are not renderer-class or expose no AVTransport
/// service with a control URL.
pub fn device_from_description(
    location: &str,
    uuid: &str,
    desc: &DeviceDescription,
) -> DiscoveryResult<DiscoveredDevice> {
    if !desc.is_renderer() {
        return Err(DiscoveryError::NotRenderer(location.to_string()));
    }

    let service = desc
        .find_service(AV_TRANSPORT_KEYWORD)
        .ok_or_else(|| DiscoveryError::NoAvTransport(location.to_string()))?;
    let control_url = service
        .control_url
        .as_deref()
        .ok_or_else(|| DiscoveryError::NoAvTransport(location.to_string()))?;

    let av_transport_control_url = resolve_url(location, desc.url_base.as_deref(), control_url)
        .ok_or_else(|| DiscoveryError::InvalidLocation(location.to_string()))?;
    let remote_ip =
        host_of(location).ok_or_else(|| DiscoveryError::InvalidLocation(location.to_string()))?;

    Ok(DiscoveredDevice {
        friendly_name: desc
            .friendly_name
            .clone()
            .unwrap_or_else(|| "Unknown".to_string()),
        uuid: uuid.to_string(),
        location: location.to_string(),
        remote_ip,
        av_transport_control_url,
        av_transport_service_type: service
            .service_type
            .clone()
            .unwrap_or_else(|| DEFAULT_AV_TRANSPORT_SERVICE.to_string()),
    })
}

/// Fetches and parses the description at `location`.
pub async fn fetch_description(
    client: &Client,
    location: &str,
    fetch_timeout: Duration,
) -> DiscoveryResult<DeviceDescription> {
    let fetch_err = |source| DiscoveryError::DescriptionFetch {
        location: location.to_string(),
        source,
    };

    let response = client
        .get(location)
        .timeout(fetch_timeout)
        .send()
        .await
        .map_err(fetch_err)?;

    let status = response.status();
    if !status.is_success() {
        return Err(DiscoveryError::DescriptionStatus {
            location: location.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response.text().await.map_err(fetch_err)?;
    description::parse(&body).map_err(|source| DiscoveryError::Description {
        location: location.to_string(),
        source,
    })
}

/// Probes a single description URL without multicast.
///
/// The device identity is the description's UDN, or the location itself if
/// the document has none.
pub async fn probe_device(
    client: &Client,
    location: &str,
    fetch_timeout: Duration,
) -> DiscoveryResult<DiscoveredDevice> {
    if url::Url::parse(location).is_err() {
        return Err(DiscoveryError::InvalidLocation(location.to_string()));
    }
    let desc = fetch_description(client, location, fetch_timeout).await?;
    let uuid = desc.udn.clone().unwrap_or_else(|| location.to_string());
    device_from_description(location, &uuid, &desc)
}

// ─────────────────────────────────────────────────────────────────────────────
// Discoverer
// ─────────────────────────────────────────────────────────────────────────────

struct ActiveSession {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs cancellable discovery sessions.
///
/// At most one session is active; starting a new one cancels the previous.
pub struct SsdpDiscoverer {
    config: SsdpConfig,
    client: Client,
    active: Mutex<Option<ActiveSession>>,
}

impl SsdpDiscoverer {
    #[must_use]
    pub fn new(config: SsdpConfig, client: Client) -> Self {
        Self {
            config,
            client,
            active: Mutex::new(None),
        }
    }

    /// Starts a discovery session and returns its event stream.
    ///
    /// The receiver yields zero or more `DeviceFound` events, at most one
    /// `Error`, and always a final `Finished`.
    pub fn start_discovery(&self) -> mpsc::Receiver<DiscoveryEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_session(
            self.config.clone(),
            self.client.clone(),
            tx,
            cancel.clone(),
        ));

        if let Some(previous) = self.active.lock().replace(ActiveSession { cancel, handle }) {
            log::debug!("[SSDP] Cancelling previous discovery session");
            previous.cancel.cancel();
        }

        rx
    }

    /// Cancels the running session, if any.
    ///
    /// The session still emits its `Finished` event.
    pub fn stop_discovery(&self) {
        if let Some(session) = self.active.lock().take() {
            log::info!("[SSDP] Discovery cancelled");
            session.cancel.cancel();
        }
    }

    /// Returns true while a session task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }
}

impl Drop for SsdpDiscoverer {
    fn drop(&mut self) {
        if let Some(session) = self.active.get_mut().take() {
            session.cancel.cancel();
        }
    }
}

/// Why the round loop ended early.
enum Interrupt {
    Cancelled,
    Fatal(DiscoveryError),
}

/// Session worker for the multicast group.
async fn run_session(
    config: SsdpConfig,
    client: Client,
    tx: mpsc::Sender<DiscoveryEvent>,
    cancel: CancellationToken,
) {
    let socket = create_socket(config.interface);
    drive_session(config, client, socket, SSDP_MULTICAST_ADDR, tx, cancel).await;
}

/// Runs the search rounds against `target` and reports the outcome.
///
/// Owns the socket and the dedup set. Sends exactly one `Finished`, last.
async fn drive_session(
    config: SsdpConfig,
    client: Client,
    socket: DiscoveryResult<UdpSocket>,
    target: &str,
    tx: mpsc::Sender<DiscoveryEvent>,
    cancel: CancellationToken,
) {
    let mut found = 0usize;

    let outcome = match socket {
        Ok(socket) => {
            log::info!(
                "[SSDP] Starting discovery ({} rounds, MX={})",
                config.rounds,
                config.mx
            );
            search(&config, &client, &socket, target, &tx, &cancel, &mut found).await
        }
        Err(e) => Err(Interrupt::Fatal(e)),
    };

    let cancelled = match outcome {
        Ok(()) => false,
        Err(Interrupt::Cancelled) => true,
        Err(Interrupt::Fatal(e)) => {
            log::error!("[SSDP] Discovery aborted: {}", e);
            let _ = tx.send(DiscoveryEvent::error(e.to_string())).await;
            false
        }
    };

    log::info!(
        "[SSDP] Discovery finished: {} device(s){}",
        found,
        if cancelled { " (cancelled)" } else { "" }
    );
    let _ = tx.send(DiscoveryEvent::finished(found, cancelled)).await;
}

async fn search(
    config: &SsdpConfig,
    client: &Client,
    socket: &UdpSocket,
    target: &str,
    tx: &mpsc::Sender<DiscoveryEvent>,
    cancel: &CancellationToken,
    found: &mut usize,
) -> Result<(), Interrupt> {
    let msg = build_msearch_message(config.mx);
    let mut seen: HashSet<String> = HashSet::new();
    let mut fetches: JoinSet<DiscoveryResult<DiscoveredDevice>> = JoinSet::new();
    let mut buf = [0u8; SSDP_RECV_BUFFER_SIZE];

    let result = async {
        for round in 0..config.rounds {
            if round > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Interrupt::Cancelled),
                    _ = sleep(config.round_delay) => {}
                }
            }

            log::debug!("[SSDP] Sending M-SEARCH {}/{}", round + 1, config.rounds);
            socket
                .send_to(msg.as_bytes(), target)
                .await
                .map_err(|e| Interrupt::Fatal(DiscoveryError::SendSearch(e)))?;

            let deadline = Instant::now() + config.listen_window;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Interrupt::Cancelled),
                    recv = timeout_at(deadline, socket.recv_from(&mut buf)) => match recv {
                        Err(_) => break,
                        Ok(Err(e)) => return Err(Interrupt::Fatal(DiscoveryError::Receive(e))),
                        Ok(Ok((amt, src))) => {
                            let response = String::from_utf8_lossy(&buf[..amt]);
                            let Some(reply) = parse_ssdp_response(&response) else {
                                log::trace!("[SSDP] Ignoring reply without LOCATION from {}", src);
                                continue;
                            };
                            if !seen.insert(reply.uuid.clone()) {
                                continue;
                            }
                            log::debug!("[SSDP] Reply from {}: uuid={}", src, reply.uuid);
                            let client = client.clone();
                            let fetch_timeout = config.description_timeout;
                            fetches.spawn(async move {
                                let desc =
                                    fetch_description(&client, &reply.location, fetch_timeout).await?;
                                device_from_description(&reply.location, &reply.uuid, &desc)
                            });
                        }
                    },
                    Some(joined) = fetches.join_next(), if !fetches.is_empty() => {
                        report_fetch(joined, tx, found).await?;
                    }
                }
            }
        }

        // Let outstanding description fetches finish.
        while !fetches.is_empty() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Interrupt::Cancelled),
                Some(joined) = fetches.join_next() => report_fetch(joined, tx, found).await?,
            }
        }
        Ok(())
    }
    .await;

    fetches.abort_all();
    result
}

/// Emits a finished description fetch, or logs why the device was dropped.
async fn report_fetch(
    joined: Result<DiscoveryResult<DiscoveredDevice>, tokio::task::JoinError>,
    tx: &mpsc::Sender<DiscoveryEvent>,
    found: &mut usize,
) -> Result<(), Interrupt> {
    match joined {
        Ok(Ok(device)) => {
            log::info!(
                "[SSDP] Found renderer: {} ({}) at {}",
                device.friendly_name,
                device.uuid,
                device.remote_ip
            );
            *found += 1;
            if tx.send(DiscoveryEvent::device_found(device)).await.is_err() {
                // Receiver dropped; nobody is listening any more.
                return Err(Interrupt::Cancelled);
            }
        }
        Ok(Err(e @ (DiscoveryError::NotRenderer(_) | DiscoveryError::NoAvTransport(_)))) => {
            log::debug!("[SSDP] Skipping device: {}", e);
        }
        Ok(Err(e)) => {
            log::warn!("[SSDP] Skipping device: {}", e);
        }
        Err(e) => {
            log::warn!("[SSDP] Description task failed: {}", e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upnp::description::ServiceEntry;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RENDERER_XML: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>Kitchen Speaker</friendlyName>
    <UDN>uuid:kitchen-1</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
        <controlURL>/upnp/control/RenderingControl1</controlURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
        <controlURL>/upnp/control/AVTransport1</controlURL>
      </service>
    </serviceList>
  </device>
</root>"#;

    #[test]
    fn test_build_msearch_message() {
        let msg = build_msearch_message(1);
        assert!(msg.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(msg.contains("HOST: 239.255.255.250:1900\r\n"));
        assert!(msg.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(msg.contains("MX: 1\r\n"));
        assert!(msg.contains("ST: urn:schemas-upnp-org:device:MediaRenderer:1\r\n"));
        assert!(msg.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_parse_ssdp_response_valid() {
        let response = "HTTP/1.1 200 OK\r\n\
CACHE-CONTROL: max-age=1800\r\n\
LOCATION: http://192.168.1.50:8080/desc.xml\r\n\
SERVER: Linux/5.10 UPnP/1.0 Renderer/1.0\r\n\
ST: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
USN: uuid:5f9ec1b3-ed59-4a2c::urn:schemas-upnp-org:device:MediaRenderer:1\r\n\r\n";

        let reply = parse_ssdp_response(response).unwrap();
        assert_eq!(reply.location, "http://192.168.1.50:8080/desc.xml");
        assert_eq!(reply.uuid, "uuid:5f9ec1b3-ed59-4a2c");
    }

    #[test]
    fn test_parse_ssdp_response_case_insensitive_headers() {
        let response = "HTTP/1.1 200 OK\r\nLocation: http://10.0.0.2/d.xml\r\nusn: uuid:abc\r\n\r\n";
        let reply = parse_ssdp_response(response).unwrap();
        assert_eq!(reply.location, "http://10.0.0.2/d.xml");
        assert_eq!(reply.uuid, "uuid:abc");
    }

    #[test]
    fn test_parse_ssdp_response_without_location() {
        let response = "HTTP/1.1 200 OK\r\nUSN: uuid:abc::upnp:rootdevice\r\n\r\n";
        assert!(parse_ssdp_response(response).is_none());
    }

    #[test]
    fn test_parse_ssdp_response_without_usn_uses_location() {
        let response = "HTTP/1.1 200 OK\r\nLOCATION: http://10.0.0.2/d.xml\r\n\r\n";
        let reply = parse_ssdp_response(response).unwrap();
        assert_eq!(reply.uuid, "http://10.0.0.2/d.xml");
    }

    /// Answers each M-SEARCH it receives with `replies`, `searches` times.
    fn spawn_responder(
        renderer: UdpSocket,
        searches: usize,
        replies: Vec<String>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buf = [0u8; SSDP_RECV_BUFFER_SIZE];
            for _ in 0..searches {
                let (n, from) = renderer.recv_from(&mut buf).await.unwrap();
                assert!(String::from_utf8_lossy(&buf[..n]).starts_with("M-SEARCH * HTTP/1.1"));
                for reply in &replies {
                    renderer.send_to(reply.as_bytes(), from).await.unwrap();
                }
            }
        })
    }

    async fn collect(mut rx: mpsc::Receiver<DiscoveryEvent>) -> Vec<DiscoveryEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn session_reports_each_device_once_and_finishes_last() {
        let descriptions = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kitchen.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RENDERER_XML))
            .expect(1)
            .mount(&descriptions)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken.xml"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&descriptions)
            .await;

        let kitchen = format!("{}/kitchen.xml", descriptions.uri());
        let broken = format!("{}/broken.xml", descriptions.uri());
        let replies = vec![
            format!("HTTP/1.1 200 OK\r\nLOCATION: {kitchen}\r\nUSN: uuid:kitchen-1::upnp:rootdevice\r\n\r\n"),
            format!("HTTP/1.1 200 OK\r\nLOCATION: {kitchen}\r\nUSN: uuid:kitchen-1::urn:schemas-upnp-org:device:MediaRenderer:1\r\n\r\n"),
            format!("HTTP/1.1 200 OK\r\nLOCATION: {broken}\r\nUSN: uuid:broken-1::upnp:rootdevice\r\n\r\n"),
            "HTTP/1.1 200 OK\r\nUSN: uuid:nowhere\r\n\r\n".to_string(),
        ];

        let renderer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = renderer.local_addr().unwrap().to_string();
        let responder = spawn_responder(renderer, 2, replies);

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = SsdpConfig {
            rounds: 2,
            listen_window: Duration::from_millis(500),
            round_delay: Duration::from_millis(50),
            description_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let session = tokio::spawn(async move {
            drive_session(
                config,
                Client::new(),
                Ok(socket),
                &target,
                tx,
                CancellationToken::new(),
            )
            .await;
        });

        let events = collect(rx).await;
        session.await.unwrap();
        responder.await.unwrap();

        let found: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                DiscoveryEvent::DeviceFound { device, .. } => Some(device.uuid.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(found, vec!["uuid:kitchen-1"]);

        // The failed description fetch is skipped, not reported.
        assert!(!events
            .iter()
            .any(|e| matches!(e, DiscoveryEvent::Error { .. })));

        let finished = events
            .iter()
            .filter(|e| matches!(e, DiscoveryEvent::Finished { .. }))
            .count();
        assert_eq!(finished, 1);
        assert!(matches!(
            events.last(),
            Some(DiscoveryEvent::Finished {
                found: 1,
                cancelled: false,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn socket_failure_reports_one_error_then_finishes() {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let busy = std::io::Error::new(std::io::ErrorKind::AddrInUse, "busy");
        drive_session(
            SsdpConfig::default(),
            Client::new(),
            Err(DiscoveryError::SocketBind(busy)),
            SSDP_MULTICAST_ADDR,
            tx,
            CancellationToken::new(),
        )
        .await;

        let events = collect(rx).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], DiscoveryEvent::Error { .. }));
        assert!(matches!(
            events[1],
            DiscoveryEvent::Finished {
                found: 0,
                cancelled: false,
                ..
            }
        ));
    }

    #[test]
    fn device_from_description_resolves_control_url() {
        let desc = description::parse(RENDERER_XML).unwrap();
        let device =
            device_from_description("http://192.168.1.50:8080/desc.xml", "uuid:k", &desc).unwrap();
        assert_eq!(device.friendly_name, "Kitchen Speaker");
        assert_eq!(device.remote_ip, "192.168.1.50");
        assert_eq!(
            device.av_transport_control_url,
            "http://192.168.1.50:8080/upnp/control/AVTransport1"
        );
        assert_eq!(
            device.av_transport_service_type,
            "urn:schemas-upnp-org:service:AVTransport:1"
        );
    }

    #[test]
    fn device_from_description_rejects_non_renderer() {
        let desc = DeviceDescription {
            device_type: Some("urn:schemas-upnp-org:device:MediaServer:1".into()),
            device_types: vec!["urn:schemas-upnp-org:device:MediaServer:1".into()],
            services: vec![ServiceEntry {
                service_type: Some("urn:schemas-upnp-org:service:AVTransport:1".into()),
                control_url: Some("/ctl".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(matches!(
            device_from_description("http://10.0.0.2/d.xml", "uuid:x", &desc),
            Err(DiscoveryError::NotRenderer(_))
        ));
    }

    #[test]
    fn device_from_description_rejects_missing_av_transport() {
        let desc = DeviceDescription {
            device_types: vec!["urn:schemas-upnp-org:device:MediaRenderer:1".into()],
            services: vec![ServiceEntry {
                service_type: Some("urn:schemas-upnp-org:service:RenderingControl:1".into()),
                control_url: Some("/rc".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(matches!(
            device_from_description("http://10.0.0.2/d.xml", "uuid:x", &desc),
            Err(DiscoveryError::NoAvTransport(_))
        ));
    }

    #[tokio::test]
    async fn probe_device_fetches_and_validates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/desc.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RENDERER_XML))
            .mount(&server)
            .await;

        let location = format!("{}/desc.xml", server.uri());
        let device = probe_device(&Client::new(), &location, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(device.uuid, "uuid:kitchen-1");
        assert_eq!(
            device.av_transport_control_url,
            format!("{}/upnp/control/AVTransport1", server.uri())
        );
    }

    #[tokio::test]
    async fn probe_device_reports_malformed_description() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/desc.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<root><device></root>"))
            .mount(&server)
            .await;

        let location = format!("{}/desc.xml", server.uri());
        let err = probe_device(&Client::new(), &location, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Description { .. }));
    }

    #[tokio::test]
    async fn probe_device_reports_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let location = format!("{}/missing.xml", server.uri());
        let err = probe_device(&Client::new(), &location, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::DescriptionStatus { status: 404, .. }
        ));
    }

    #[tokio::test]
    async fn cancelled_session_still_finishes() {
        let discoverer = SsdpDiscoverer::new(
            SsdpConfig {
                rounds: 3,
                listen_window: Duration::from_secs(5),
                interface: Some(Ipv4Addr::LOCALHOST),
                ..Default::default()
            },
            Client::new(),
        );
        let mut rx = discoverer.start_discovery();
        discoverer.stop_discovery();

        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        assert!(matches!(last, Some(DiscoveryEvent::Finished { .. })));
    }
}
