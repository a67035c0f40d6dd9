//! Shared discovery types.

use serde::Serialize;
use thiserror::Error;

use super::description::DescriptionError;

/// A renderer that passed the MediaRenderer and AVTransport checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredDevice {
    /// Human-readable label from the description's `friendlyName`.
    pub friendly_name: String,
    /// Identity taken from the USN, before `::`.
    pub uuid: String,
    /// URL of the device description document.
    pub location: String,
    /// Host the description was fetched from.
    pub remote_ip: String,
    /// Absolute URL that SOAP actions are POSTed to.
    pub av_transport_control_url: String,
    /// AVTransport service URN.
    pub av_transport_service_type: String,
}

/// Errors that can occur during device discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Failed to create or configure the SSDP socket.
    #[error("Failed to bind SSDP socket: {0}")]
    SocketBind(#[source] std::io::Error),

    /// Failed to send the M-SEARCH query.
    #[error("Failed to send M-SEARCH: {0}")]
    SendSearch(#[source] std::io::Error),

    /// The socket failed while waiting for replies.
    #[error("SSDP receive failed: {0}")]
    Receive(#[source] std::io::Error),

    /// The LOCATION URL could not be parsed.
    #[error("Invalid LOCATION URL: {0}")]
    InvalidLocation(String),

    /// The description document could not be fetched.
    #[error("Failed to fetch description from {location}: {source}")]
    DescriptionFetch {
        location: String,
        #[source]
        source: reqwest::Error,
    },

    /// The description server answered with a non-success status.
    #[error("Description request to {location} returned HTTP {status}")]
    DescriptionStatus { location: String, status: u16 },

    /// The description document could not be parsed.
    #[error("Invalid description at {location}: {source}")]
    Description {
        location: String,
        #[source]
        source: DescriptionError,
    },

    /// The device does not advertise a MediaRenderer device type.
    #[error("Device at {0} is not a media renderer")]
    NotRenderer(String),

    /// The device has no usable AVTransport service.
    #[error("Device at {0} exposes no AVTransport service")]
    NoAvTransport(String),
}

/// Convenient Result alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Extracts the device identity from a USN header value.
///
/// `uuid:abc::urn:schemas-upnp-org:device:MediaRenderer:1` becomes `uuid:abc`.
/// A USN without `::` is returned whole.
#[must_use]
pub fn uuid_from_usn(usn: &str) -> String {
    let usn = usn.trim();
    match usn.split_once("::") {
        Some((uuid, _)) => uuid.to_string(),
        None => usn.to_string(),
    }
}
