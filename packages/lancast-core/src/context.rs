//! Local network addressing for the stream proxy.
//!
//! Renderers pull audio and artwork from this host, so every URL handed to a
//! device must carry an address the device can reach. [`IpDetector`] decides
//! which address that is; [`UrlBuilder`] turns it into proxy URLs.

use std::net::IpAddr;
use std::sync::Arc;

use crate::protocol_constants::{LOGO_PATH, STREAM_PATH};

/// Trait for detecting the local IP address.
///
/// Different environments may need different detection strategies.
/// This trait allows injecting the appropriate detector.
pub trait IpDetector: Send + Sync {
    /// Detects the local IP address.
    fn detect(&self) -> Result<String, NetworkError>;
}

/// Default IP detector using the system's network interfaces.
#[derive(Debug, Clone, Default)]
pub struct LocalIpDetector;

impl LocalIpDetector {
    /// Creates a new `LocalIpDetector`.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Creates a new `LocalIpDetector` wrapped in an Arc.
    #[must_use]
    pub fn arc() -> Arc<dyn IpDetector> {
        Arc::new(Self::new())
    }
}

impl IpDetector for LocalIpDetector {
    fn detect(&self) -> Result<String, NetworkError> {
        local_ip_address::local_ip()
            .map(|ip| ip.to_string())
            .map_err(|e| NetworkError::Detection(e.to_string()))
    }
}

/// Detector that always reports a configured address.
///
/// Used when the advertise IP is set explicitly, and in tests.
#[derive(Debug, Clone)]
pub struct FixedIpDetector {
    ip: IpAddr,
}

impl FixedIpDetector {
    #[must_use]
    pub fn new(ip: IpAddr) -> Self {
        Self { ip }
    }

    #[must_use]
    pub fn arc(ip: IpAddr) -> Arc<dyn IpDetector> {
        Arc::new(Self::new(ip))
    }
}

impl IpDetector for FixedIpDetector {
    fn detect(&self) -> Result<String, NetworkError> {
        Ok(self.ip.to_string())
    }
}

/// Errors that can occur during network operations.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Could not detect local IP address.
    #[error("Failed to detect local IP: {0}")]
    Detection(String),
}

/// Builder for constructing URLs served by the stream proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlBuilder {
    ip: String,
    port: u16,
}

impl UrlBuilder {
    /// Creates a new `UrlBuilder` for the given proxy address.
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    /// Returns the base URL for the proxy (e.g., `http://192.168.1.100:8080`).
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }

    /// Returns the local plain-HTTP URL that relays `remote_url`.
    #[must_use]
    pub fn stream_url(&self, remote_url: &str) -> String {
        format!(
            "{}{}?url={}",
            self.base_url(),
            STREAM_PATH,
            urlencoding::encode(remote_url)
        )
    }

    /// Returns the artwork URL.
    #[must_use]
    pub fn logo_url(&self) -> String {
        format!("{}{}", self.base_url(), LOGO_PATH)
    }
}
