//! Local HTTP relay that renderers pull audio and artwork from.
//!
//! Many renderers cannot play HTTPS or choke on origin quirks. The proxy
//! exposes every stream as plain HTTP on the LAN:
//!
//! - `GET /stream?url=<percent-encoded origin>`: relayed bytes, Range aware
//! - `GET /logo.jpg`: the current artwork snapshot, or 404
//!
//! Connections are served by tokio tasks, at most
//! [`ProxyConfig::max_connections`] at a time. Stopping the server closes the
//! listener and cancels every in-flight relay.

mod http;
mod relay;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::artwork::{ArtworkError, ArtworkStore};
use crate::context::{IpDetector, NetworkError, UrlBuilder};
use relay::{handle_connection, RelayContext};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to bind proxy listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("stream proxy is not running")]
    NotRunning,
}

/// Proxy settings.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind. Defaults to all IPv4 interfaces.
    pub bind_ip: IpAddr,
    /// Port to bind; 0 lets the OS choose.
    pub port: u16,
    /// Maximum concurrently served connections.
    pub max_connections: usize,
    /// Connect timeout towards stream origins.
    pub connect_timeout: Duration,
    /// Read timeout towards stream origins. Bounds a relay whose renderer
    /// never disconnects but whose origin stalls.
    pub read_timeout: Duration,
    /// Time a client gets to send its request head.
    pub head_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            max_connections: 32,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            head_timeout: Duration::from_secs(10),
        }
    }
}

/// Where a started proxy can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    /// LAN address advertised to renderers.
    pub local_ip: String,
    /// Port the listener is bound to.
    pub port: u16,
}

impl ProxyEndpoint {
    #[must_use]
    pub fn urls(&self) -> UrlBuilder {
        UrlBuilder::new(self.local_ip.clone(), self.port)
    }
}

struct Running {
    endpoint: ProxyEndpoint,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct StreamProxyServer {
    config: ProxyConfig,
    detector: Arc<dyn IpDetector>,
    artwork: Arc<ArtworkStore>,
    client: Client,
    running: Mutex<Option<Running>>,
}

impl StreamProxyServer {
    /// Creates a stopped server.
    pub fn new(
        config: ProxyConfig,
        detector: Arc<dyn IpDetector>,
        artwork: Arc<ArtworkStore>,
    ) -> Result<Self, ProxyError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()?;

        Ok(Self {
            config,
            detector,
            artwork,
            client,
            running: Mutex::new(None),
        })
    }

    /// Binds the listener and starts accepting. Idempotent while running.
    pub async fn start(&self) -> Result<ProxyEndpoint, ProxyError> {
        if let Some(endpoint) = self.endpoint() {
            return Ok(endpoint);
        }

        let local_ip = self.detector.detect()?;
        let listener = TcpListener::bind(SocketAddr::new(self.config.bind_ip, self.config.port))
            .await
            .map_err(ProxyError::Bind)?;
        let port = listener.local_addr().map_err(ProxyError::Bind)?.port();

        let endpoint = ProxyEndpoint { local_ip, port };
        let cancel = CancellationToken::new();
        let ctx = Arc::new(RelayContext {
            client: self.client.clone(),
            artwork: Arc::clone(&self.artwork),
            head_timeout: self.config.head_timeout,
        });
        let permits = Arc::new(Semaphore::new(self.config.max_connections.max(1)));

        let mut running = self.running.lock();
        if let Some(existing) = running.as_ref() {
            // Lost a start race; drop our listener.
            return Ok(existing.endpoint.clone());
        }
        let handle = tokio::spawn(accept_loop(listener, ctx, permits, cancel.clone()));
        *running = Some(Running {
            endpoint: endpoint.clone(),
            cancel,
            handle,
        });

        log::info!(
            "[Proxy] Listening on port {} (advertised as {})",
            endpoint.port,
            endpoint.local_ip
        );
        Ok(endpoint)
    }

    /// Closes the listener and halts all relays.
    pub fn stop(&self) {
        if let Some(running) = self.running.lock().take() {
            running.cancel.cancel();
            log::info!("[Proxy] Stopped (port {})", running.endpoint.port);
            drop(running.handle);
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    #[must_use]
    pub fn endpoint(&self) -> Option<ProxyEndpoint> {
        self.running.lock().as_ref().map(|r| r.endpoint.clone())
    }

    /// Local plain-HTTP URL relaying `remote_url`.
    pub fn proxy_url(&self, remote_url: &str) -> Result<String, ProxyError> {
        self.endpoint()
            .map(|e| e.urls().stream_url(remote_url))
            .ok_or(ProxyError::NotRunning)
    }

    /// URL of the artwork resource.
    pub fn logo_url(&self) -> Result<String, ProxyError> {
        self.endpoint()
            .map(|e| e.urls().logo_url())
            .ok_or(ProxyError::NotRunning)
    }

    /// Scales `image` to the logo size and serves it from now on.
    pub fn set_logo(&self, image: &[u8]) -> Result<(), ArtworkError> {
        self.artwork.set_logo_image(image)
    }

    #[must_use]
    pub fn artwork(&self) -> &Arc<ArtworkStore> {
        &self.artwork
    }
}

impl Drop for StreamProxyServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<RelayContext>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    loop {
        let permit = tokio::select! {
            () = cancel.cancelled() => break,
            p = Arc::clone(&permits).acquire_owned() => match p {
                Ok(p) => p,
                Err(_) => break,
            },
        };

        let (stream, peer) = tokio::select! {
            () = cancel.cancelled() => break,
            r = listener.accept() => match r {
                Ok(conn) => conn,
                Err(e) => {
                    log::warn!("[Proxy] Accept failed: {}", e);
                    continue;
                }
            },
        };

        let ctx = Arc::clone(&ctx);
        let conn_cancel = cancel.child_token();
        tokio::spawn(async move {
            let _permit = permit;
            tokio::select! {
                () = conn_cancel.cancelled() => {
                    log::debug!("[Proxy] Relay to {} cancelled", peer);
                }
                () = handle_connection(stream, peer, &ctx) => {}
            }
        });
    }

    log::debug!("[Proxy] Accept loop exited");
}
