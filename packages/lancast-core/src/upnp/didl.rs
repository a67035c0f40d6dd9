//! DIDL-Lite metadata for SetAVTransportURI.
//!
//! Renderers that display "now playing" information read it from the
//! `CurrentURIMetaData` argument. The stream is a live broadcast, so the
//! item is sent once at playback start and never updated.

use serde::Deserialize;

use super::xml::escape_xml;
use crate::protocol_constants::APP_NAME;

/// Display metadata for a casting session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetadata {
    /// Station or track title.
    pub title: String,
    /// Defaults to the application name.
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    /// URL of the artwork, typically the proxy's `/logo.jpg`.
    #[serde(default)]
    pub artwork_url: Option<String>,
    /// MIME type advertised in `protocolInfo`.
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
}

fn default_mime_type() -> String {
    "audio/mpeg".to_string()
}

impl StreamMetadata {
    /// Creates metadata with only a title; everything else defaults.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: None,
            album: None,
            artwork_url: None,
            mime_type: default_mime_type(),
        }
    }
}

/// Formats a DIDL-Lite document describing `stream_url`.
///
/// The result is raw XML; the SOAP layer escapes it once more when it is
/// placed inside `CurrentURIMetaData`.
pub fn format_didl_lite(stream_url: &str, metadata: &StreamMetadata) -> String {
    let artist = metadata.artist.as_deref().unwrap_or(APP_NAME);

    log::debug!(
        "[DIDL] title={:?}, artist={:?}, mime={}, art={:?}",
        metadata.title,
        artist,
        metadata.mime_type,
        metadata.artwork_url
    );

    let mut didl = String::from(
        r#"<DIDL-Lite xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/" xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/">"#,
    );
    didl.push_str(r#"<item id="0" parentID="-1" restricted="1">"#);
    didl.push_str(&format!(
        "<dc:title>{}</dc:title>",
        escape_xml(&metadata.title)
    ));
    didl.push_str(&format!("<dc:creator>{}</dc:creator>", escape_xml(artist)));
    didl.push_str(&format!("<upnp:artist>{}</upnp:artist>", escape_xml(artist)));

    if let Some(album) = &metadata.album {
        didl.push_str(&format!("<upnp:album>{}</upnp:album>", escape_xml(album)));
    }

    if let Some(art) = &metadata.artwork_url {
        didl.push_str(&format!(
            "<upnp:albumArtURI>{}</upnp:albumArtURI>",
            escape_xml(art)
        ));
    }

    didl.push_str("<upnp:class>object.item.audioItem.audioBroadcast</upnp:class>");
    didl.push_str(&format!(
        r#"<res protocolInfo="http-get:*:{}:*">{}</res>"#,
        escape_xml(&metadata.mime_type),
        escape_xml(stream_url)
    ));
    didl.push_str("</item></DIDL-Lite>");

    didl
}
