//! AVTransport actions.
//!
//! [`AvTransport`] is the seam the playback controller depends on, so the
//! state machine can be driven by a mock in tests. [`SoapAvTransport`] is the
//! real implementation over [`SoapClient`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use super::soap::{SoapClient, SoapResult};
use super::types::DiscoveredDevice;
use crate::protocol_constants::AV_TRANSPORT_INSTANCE_ID;

/// `CurrentTransportState` values defined by AVTransport:1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    Playing,
    Transitioning,
    PausedPlayback,
    Stopped,
    NoMediaPresent,
    /// Vendor-specific or unrecognised value.
    Other(String),
}

impl TransportState {
    /// Parses a raw `CurrentTransportState` value. Never fails.
    #[must_use]
    pub fn from_raw(s: &str) -> Self {
        match s.trim() {
            "PLAYING" => Self::Playing,
            "TRANSITIONING" => Self::Transitioning,
            "PAUSED_PLAYBACK" => Self::PausedPlayback,
            "STOPPED" => Self::Stopped,
            "NO_MEDIA_PRESENT" => Self::NoMediaPresent,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns true if the renderer is playing or about to play.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Playing | Self::Transitioning)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Playing => "PLAYING",
            Self::Transitioning => "TRANSITIONING",
            Self::PausedPlayback => "PAUSED_PLAYBACK",
            Self::Stopped => "STOPPED",
            Self::NoMediaPresent => "NO_MEDIA_PRESENT",
            Self::Other(s) => s,
        };
        f.write_str(s)
    }
}

/// Transport control operations on a renderer.
#[async_trait]
pub trait AvTransport: Send + Sync {
    /// Points the renderer at `uri`. `metadata` may be empty.
    async fn set_av_transport_uri(
        &self,
        device: &DiscoveredDevice,
        uri: &str,
        metadata: &str,
    ) -> SoapResult<()>;

    /// Starts playback at normal speed.
    async fn play(&self, device: &DiscoveredDevice) -> SoapResult<()>;

    /// Stops playback.
    async fn stop(&self, device: &DiscoveredDevice) -> SoapResult<()>;

    /// Polls the renderer's `CurrentTransportState`.
    async fn get_transport_info(&self, device: &DiscoveredDevice) -> SoapResult<TransportState>;
}

/// Timeouts for AVTransport actions.
#[derive(Debug, Clone)]
pub struct SoapTimeouts {
    /// Timeout for SetAVTransportURI, Play and Stop.
    pub action: Duration,
    /// Timeout for GetTransportInfo.
    pub query: Duration,
}

impl Default for SoapTimeouts {
    fn default() -> Self {
        Self {
            action: Duration::from_secs(3),
            query: Duration::from_secs(8),
        }
    }
}

/// [`AvTransport`] over SOAP.
pub struct SoapAvTransport {
    soap: SoapClient,
    timeouts: SoapTimeouts,
}

impl SoapAvTransport {
    #[must_use]
    pub fn new(soap: SoapClient, timeouts: SoapTimeouts) -> Self {
        Self { soap, timeouts }
    }

    async fn action(
        &self,
        device: &DiscoveredDevice,
        action: &str,
        args: &[(&str, &str)],
    ) -> SoapResult<()> {
        self.soap
            .invoke(
                &device.av_transport_control_url,
                &device.av_transport_service_type,
                action,
                args,
                self.timeouts.action,
            )
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl AvTransport for SoapAvTransport {
    async fn set_av_transport_uri(
        &self,
        device: &DiscoveredDevice,
        uri: &str,
        metadata: &str,
    ) -> SoapResult<()> {
        self.action(
            device,
            "SetAVTransportURI",
            &[
                ("InstanceID", AV_TRANSPORT_INSTANCE_ID),
                ("CurrentURI", uri),
                ("CurrentURIMetaData", metadata),
            ],
        )
        .await
    }

    async fn play(&self, device: &DiscoveredDevice) -> SoapResult<()> {
        self.action(
            device,
            "Play",
            &[("InstanceID", AV_TRANSPORT_INSTANCE_ID), ("Speed", "1")],
        )
        .await
    }

    async fn stop(&self, device: &DiscoveredDevice) -> SoapResult<()> {
        self.action(device, "Stop", &[("InstanceID", AV_TRANSPORT_INSTANCE_ID)])
            .await
    }

    async fn get_transport_info(&self, device: &DiscoveredDevice) -> SoapResult<TransportState> {
        let raw = self
            .soap
            .invoke_query(
                &device.av_transport_control_url,
                &device.av_transport_service_type,
                "GetTransportInfo",
                &[("InstanceID", AV_TRANSPORT_INSTANCE_ID)],
                "CurrentTransportState",
                self.timeouts.query,
            )
            .await?;
        Ok(TransportState::from_raw(&raw))
    }
}
