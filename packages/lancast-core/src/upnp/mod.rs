//! UPnP control point: discovery, description parsing and AVTransport control.
//!
//! - [`ssdp`]: M-SEARCH sessions yielding [`DiscoveredDevice`]s
//! - [`description`]: device description parsing and URL resolution
//! - [`soap`]: SOAP 1.1 transport
//! - [`av_transport`]: the [`AvTransport`] seam and its SOAP implementation
//! - [`didl`]: DIDL-Lite metadata

pub mod av_transport;
pub mod description;
pub mod didl;
pub mod soap;
pub mod ssdp;
pub mod types;
pub(crate) mod xml;

pub use av_transport::{AvTransport, SoapAvTransport, SoapTimeouts, TransportState};
pub use description::{DescriptionError, DeviceDescription, ServiceEntry};
pub use didl::{format_didl_lite, StreamMetadata};
pub use soap::{SoapClient, SoapError, SoapFault, SoapResult};
pub use ssdp::{probe_device, SsdpConfig, SsdpDiscoverer};
pub use types::{DiscoveredDevice, DiscoveryError, DiscoveryResult};
