//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by external specifications (SSDP, UPnP AVTransport,
//! DLNA) or by renderer compatibility requirements. Tunable timings live in
//! [`crate::state::Config`] instead.

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name used in logs and health responses.
pub const APP_NAME: &str = "lancast";

/// User-Agent sent on all outbound HTTP requests.
pub const USER_AGENT: &str = concat!("LanCast/", env!("CARGO_PKG_VERSION"));

// ─────────────────────────────────────────────────────────────────────────────
// SSDP
// ─────────────────────────────────────────────────────────────────────────────

/// Standard SSDP multicast group and port.
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250:1900";

/// Search target for renderer-class devices.
pub const MEDIA_RENDERER_SEARCH_TARGET: &str = "urn:schemas-upnp-org:device:MediaRenderer:1";

/// Multicast TTL recommended by UPnP 1.0 for SSDP.
pub const SSDP_MULTICAST_TTL: u32 = 4;

/// Receive buffer size for SSDP replies.
pub const SSDP_RECV_BUFFER_SIZE: usize = 2048;

/// Device type keyword that marks a description as renderer-class.
pub const MEDIA_RENDERER_KEYWORD: &str = "MediaRenderer";

/// Service keyword used to locate the transport-control service block.
pub const AV_TRANSPORT_KEYWORD: &str = "AVTransport";

// ─────────────────────────────────────────────────────────────────────────────
// SOAP / AVTransport
// ─────────────────────────────────────────────────────────────────────────────

/// SOAP 1.1 envelope namespace.
pub const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// SOAP 1.1 encoding style.
pub const SOAP_ENCODING_STYLE: &str = "http://schemas.xmlsoap.org/soap/encoding/";

/// Content-Type for SOAP requests.
pub const SOAP_CONTENT_TYPE: &str = "text/xml; charset=\"utf-8\"";

/// Service type assumed when a description omits `serviceType`.
pub const DEFAULT_AV_TRANSPORT_SERVICE: &str = "urn:schemas-upnp-org:service:AVTransport:1";

/// AVTransport instance that all actions target.
pub const AV_TRANSPORT_INSTANCE_ID: &str = "0";

/// Settle delay between SetAVTransportURI and Play (milliseconds).
///
/// Some renderers reject a Play issued immediately after the URI is set.
pub const PLAY_SETTLE_DELAY_MS: u64 = 150;

// ─────────────────────────────────────────────────────────────────────────────
// Stream Proxy / DLNA
// ─────────────────────────────────────────────────────────────────────────────

/// Path of the cached artwork resource.
pub const LOGO_PATH: &str = "/logo.jpg";

/// Path prefix of the stream relay resource.
pub const STREAM_PATH: &str = "/stream";

/// Chunk size used when copying origin bytes to the renderer.
pub const RELAY_CHUNK_SIZE: usize = 16 * 1024;

/// Upper bound for an inbound request head (request line + headers).
pub const MAX_REQUEST_HEAD_SIZE: usize = 8 * 1024;

/// Edge length of the square artwork served at [`LOGO_PATH`].
pub const LOGO_SIZE_PX: u32 = 300;

/// JPEG quality used when re-encoding artwork.
pub const LOGO_JPEG_QUALITY: u8 = 85;

/// DLNA transfer mode header value.
pub const DLNA_TRANSFER_MODE: &str = "Streaming";

/// DLNA content features header value (byte seek allowed, streaming flags set).
pub const DLNA_CONTENT_FEATURES: &str =
    "DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS=01700000000000000000000000000000";

/// Accept header sent to stream origins.
pub const ORIGIN_ACCEPT: &str = "*/*";
