//! LanCast Core - casting to UPnP/DLNA media renderers on the local network.
//!
//! The crate finds renderers with SSDP, drives them through the AVTransport
//! SOAP service, watches that playback keeps going, and relays origin
//! streams through a local HTTP proxy so renderers only ever talk to the LAN.
//!
//! # Architecture
//!
//! - [`upnp`]: SSDP discovery, device description parsing, SOAP transport
//! - [`playback`]: per-session playback control with a transport watchdog
//! - [`proxy`]: stream relay and `/logo.jpg` server for renderers
//! - [`artwork`]: logo preparation and caching
//! - [`services`]: the [`CastService`] facade used by the API
//! - [`api`]: local control API (HTTP + server-sent events)
//! - [`state`]: configuration and the device registry
//! - [`events`]: typed discovery and playback events
//! - [`context`]: local IP detection and URL building
//! - [`error`]: centralized error types
//!
//! # Abstraction Traits
//!
//! - [`AvTransport`](upnp::AvTransport): renderer transport control
//! - [`IpDetector`](context::IpDetector): local IP detection

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod artwork;
pub mod bootstrap;
pub mod context;
pub mod error;
pub mod events;
pub mod playback;
pub mod protocol_constants;
pub mod proxy;
pub mod services;
pub mod state;
pub mod upnp;
pub mod utils;

// Re-export commonly used types at the crate root
pub use artwork::{ArtworkError, ArtworkStore};
pub use context::{FixedIpDetector, IpDetector, LocalIpDetector, NetworkError, UrlBuilder};
pub use error::{ErrorCode, LancastError, LancastResult};
pub use events::{BroadcastEvent, DiscoveryEvent, PlaybackEvent};
pub use playback::{PlaybackController, PlaybackError, PlaybackState, WatchdogConfig};
pub use proxy::{ProxyConfig, ProxyEndpoint, ProxyError, StreamProxyServer};
pub use state::{Config, DeviceRegistry};
pub use utils::now_millis;

// Re-export UPnP types
pub use upnp::{
    probe_device, AvTransport, DiscoveredDevice, DiscoveryError, SoapAvTransport, SoapClient,
    SoapError, SsdpConfig, SsdpDiscoverer, StreamMetadata, TransportState,
};

// Re-export service types
pub use services::{CastOutcome, CastRequest, CastService, CastSnapshot};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, BootstrappedServices};

// Re-export API types
pub use api::{serve, start_server, AppState, ServerError};
