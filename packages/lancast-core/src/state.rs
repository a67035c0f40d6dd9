//! Configuration and shared runtime state.
//!
//! [`Config`] carries every tunable; it is converted into the per-component
//! settings ([`SsdpConfig`], [`SoapTimeouts`], [`WatchdogConfig`],
//! [`ProxyConfig`]) when services are built. [`DeviceRegistry`] holds the
//! renderers reported by discovery and probing.

use std::net::Ipv4Addr;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::playback::WatchdogConfig;
use crate::proxy::ProxyConfig;
use crate::upnp::{DiscoveredDevice, SoapTimeouts, SsdpConfig};

/// Configuration for the casting core.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    // API
    /// Port for the local control API (0 = auto-allocate).
    pub api_port: u16,

    /// Capacity of the event broadcast channel feeding API clients.
    pub event_channel_capacity: usize,

    // Discovery
    /// Number of M-SEARCH rounds per discovery session.
    pub ssdp_rounds: u32,

    /// MX header value (seconds).
    pub ssdp_mx: u64,

    /// Listen window after each M-SEARCH (milliseconds).
    pub ssdp_listen_window_ms: u64,

    /// Pause between M-SEARCH rounds (milliseconds).
    pub ssdp_round_delay_ms: u64,

    /// Timeout for fetching a device description (milliseconds).
    pub description_timeout_ms: u64,

    /// IPv4 interface to send M-SEARCH from. `None` lets the OS choose.
    pub ssdp_interface: Option<Ipv4Addr>,

    // SOAP
    /// Timeout for SetAVTransportURI, Play and Stop (milliseconds).
    pub soap_action_timeout_ms: u64,

    /// Timeout for GetTransportInfo (milliseconds).
    pub soap_query_timeout_ms: u64,

    // Watchdog
    /// Interval between transport polls (seconds).
    pub watchdog_interval_secs: u64,

    /// Consecutive non-playing polls before playback is failed.
    pub watchdog_max_failures: u32,

    // Proxy
    /// Port for the stream proxy (0 = ephemeral).
    pub proxy_port: u16,

    /// Maximum concurrently served proxy connections.
    pub proxy_max_connections: usize,

    /// Connect timeout towards stream origins (seconds).
    pub proxy_connect_timeout_secs: u64,

    /// Read timeout towards stream origins (seconds).
    pub proxy_read_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_port: 49500,
            event_channel_capacity: 100,
            ssdp_rounds: 3,
            ssdp_mx: 1,
            ssdp_listen_window_ms: 1000,
            ssdp_round_delay_ms: 1000,
            description_timeout_ms: 4000,
            ssdp_interface: None,
            soap_action_timeout_ms: 3000,
            soap_query_timeout_ms: 8000,
            watchdog_interval_secs: 5,
            watchdog_max_failures: 3,
            proxy_port: 0,
            proxy_max_connections: 32,
            proxy_connect_timeout_secs: 10,
            proxy_read_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        if self.ssdp_rounds == 0 {
            return Err("ssdp_rounds must be >= 1".to_string());
        }
        if !(1..=3).contains(&self.ssdp_mx) {
            return Err("ssdp_mx must be between 1 and 3".to_string());
        }
        if !(500..=3000).contains(&self.ssdp_listen_window_ms) {
            return Err("ssdp_listen_window_ms must be between 500 and 3000".to_string());
        }
        if self.soap_action_timeout_ms == 0 || self.soap_query_timeout_ms == 0 {
            return Err("SOAP timeouts must be >= 1 ms".to_string());
        }
        if self.watchdog_interval_secs == 0 {
            return Err("watchdog_interval_secs must be >= 1".to_string());
        }
        if self.watchdog_max_failures == 0 {
            return Err("watchdog_max_failures must be >= 1".to_string());
        }
        if self.proxy_max_connections == 0 {
            return Err("proxy_max_connections must be >= 1".to_string());
        }
        Ok(())
    }

    #[must_use]
    pub fn ssdp_config(&self) -> SsdpConfig {
        SsdpConfig {
            rounds: self.ssdp_rounds,
            mx: self.ssdp_mx,
            listen_window: Duration::from_millis(self.ssdp_listen_window_ms),
            round_delay: Duration::from_millis(self.ssdp_round_delay_ms),
            description_timeout: self.description_timeout(),
            interface: self.ssdp_interface,
        }
    }

    #[must_use]
    pub fn description_timeout(&self) -> Duration {
        Duration::from_millis(self.description_timeout_ms)
    }

    #[must_use]
    pub fn soap_timeouts(&self) -> SoapTimeouts {
        SoapTimeouts {
            action: Duration::from_millis(self.soap_action_timeout_ms),
            query: Duration::from_millis(self.soap_query_timeout_ms),
        }
    }

    #[must_use]
    pub fn watchdog_config(&self) -> WatchdogConfig {
        WatchdogConfig {
            poll_interval: Duration::from_secs(self.watchdog_interval_secs),
            max_failures: self.watchdog_max_failures,
        }
    }

    #[must_use]
    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig {
            port: self.proxy_port,
            max_connections: self.proxy_max_connections,
            connect_timeout: Duration::from_secs(self.proxy_connect_timeout_secs),
            read_timeout: Duration::from_secs(self.proxy_read_timeout_secs),
            ..Default::default()
        }
    }
}

/// Renderers known to this process, keyed by device identity.
///
/// Fed by discovery sessions and probes; entries are replaced when a device
/// is seen again (its control URL may have moved).
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: DashMap<String, DiscoveredDevice>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a device. Returns true if it was not known before.
    pub fn upsert(&self, device: DiscoveredDevice) -> bool {
        self.devices.insert(device.uuid.clone(), device).is_none()
    }

    #[must_use]
    pub fn get(&self, uuid: &str) -> Option<DiscoveredDevice> {
        self.devices.get(uuid).map(|d| d.value().clone())
    }

    /// All devices, sorted by friendly name.
    #[must_use]
    pub fn list(&self) -> Vec<DiscoveredDevice> {
        let mut devices: Vec<_> = self.devices.iter().map(|e| e.value().clone()).collect();
        devices.sort_by(|a, b| {
            a.friendly_name
                .to_lowercase()
                .cmp(&b.friendly_name.to_lowercase())
                .then_with(|| a.uuid.cmp(&b.uuid))
        });
        devices
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn clear(&self) {
        self.devices.clear();
    }
}
