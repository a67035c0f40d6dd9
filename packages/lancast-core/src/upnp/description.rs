//! UPnP device description parsing.
//!
//! Extracts the handful of fields a control point needs from the document
//! served at an SSDP `LOCATION`: the device's `friendlyName` and `deviceType`
//! (first occurrence in the document), its `UDN`, and every `<service>` block with its
//! `serviceType`, `serviceId` and URLs. Service fields are scoped to their own
//! block, so a description listing RenderingControl before AVTransport never
//! yields the wrong control URL.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use thiserror::Error;
use url::Url;

use crate::protocol_constants::MEDIA_RENDERER_KEYWORD;

/// Errors produced while parsing a device description document.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescriptionError {
    /// The XML reader rejected the document.
    #[error("Malformed device description at byte {position}: {message}")]
    Malformed { position: u64, message: String },

    /// The document contained no element at all.
    #[error("Device description has no root element")]
    Empty,

    /// The document ended with elements still open.
    #[error("Device description ended with {0} unclosed element(s)")]
    Truncated(usize),
}

/// One `<service>` block of a device description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceEntry {
    pub service_type: Option<String>,
    pub service_id: Option<String>,
    pub control_url: Option<String>,
    pub scpd_url: Option<String>,
    pub event_sub_url: Option<String>,
}

impl ServiceEntry {
    /// Returns true if any field of this block contains `keyword`.
    #[must_use]
    pub fn matches(&self, keyword: &str) -> bool {
        [
            &self.service_type,
            &self.service_id,
            &self.control_url,
            &self.scpd_url,
            &self.event_sub_url,
        ]
        .into_iter()
        .filter_map(Option::as_deref)
        .any(|value| value.contains(keyword))
    }
}

/// The parsed subset of a device description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDescription {
    /// First `friendlyName` in the document (the root device).
    pub friendly_name: Option<String>,
    /// First `deviceType` in the document (the root device).
    pub device_type: Option<String>,
    /// Every `deviceType`, including embedded devices.
    pub device_types: Vec<String>,
    /// First `UDN` in the document (the root device).
    pub udn: Option<String>,
    /// Optional `URLBase` declared by UPnP 1.0 devices.
    pub url_base: Option<String>,
    /// Every `<service>` block, in document order.
    pub services: Vec<ServiceEntry>,
}

impl DeviceDescription {
    /// Returns true if the root device or any embedded device is a MediaRenderer.
    #[must_use]
    pub fn is_renderer(&self) -> bool {
        self.device_types
            .iter()
            .any(|t| t.contains(MEDIA_RENDERER_KEYWORD))
    }

    /// Returns the first service block matching `keyword`.
    #[must_use]
    pub fn find_service(&self, keyword: &str) -> Option<&ServiceEntry> {
        self.services.iter().find(|s| s.matches(keyword))
    }
}

/// Child elements whose text we keep.
#[derive(Clone, Copy)]
enum Field {
    FriendlyName,
    DeviceType,
    Udn,
    UrlBase,
    ServiceType,
    ServiceId,
    ControlUrl,
    ScpdUrl,
    EventSubUrl,
}

impl Field {
    fn from_local_name(name: &[u8]) -> Option<Self> {
        match name {
            b"friendlyName" => Some(Self::FriendlyName),
            b"deviceType" => Some(Self::DeviceType),
            b"UDN" => Some(Self::Udn),
            b"URLBase" => Some(Self::UrlBase),
            b"serviceType" => Some(Self::ServiceType),
            b"serviceId" => Some(Self::ServiceId),
            b"controlURL" => Some(Self::ControlUrl),
            b"SCPDURL" => Some(Self::ScpdUrl),
            b"eventSubURL" => Some(Self::EventSubUrl),
            _ => None,
        }
    }
}

/// Parses a device description document.
///
/// Missing tags produce `None` fields. Documents the XML reader cannot
/// process, or that end before their root element closes, are rejected.
pub fn parse(xml: &str) -> Result<DeviceDescription, DescriptionError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut desc = DeviceDescription::default();
    let mut current: Option<ServiceEntry> = None;
    let mut depth: usize = 0;
    let mut saw_root = false;

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(e) => {
                return Err(DescriptionError::Malformed {
                    position: reader.error_position() as u64,
                    message: e.to_string(),
                })
            }
        };

        match event {
            Event::Start(ref e) => {
                saw_root = true;
                let local = e.local_name();
                if local.as_ref() == b"service" {
                    current = Some(ServiceEntry::default());
                    depth += 1;
                } else if let Some(field) = Field::from_local_name(local.as_ref()) {
                    let text = read_field_text(&mut reader, e)?;
                    apply_field(&mut desc, current.as_mut(), field, text);
                } else {
                    depth += 1;
                }
            }
            Event::Empty(_) => saw_root = true,
            Event::End(ref e) => {
                if e.local_name().as_ref() == b"service" {
                    if let Some(service) = current.take() {
                        desc.services.push(service);
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => {
                if !saw_root {
                    return Err(DescriptionError::Empty);
                }
                if depth > 0 {
                    return Err(DescriptionError::Truncated(depth));
                }
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(desc)
}

/// Reads an element's text up to its end tag and decodes entities.
///
/// Returns `None` for empty or whitespace-only content.
fn read_field_text(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
) -> Result<Option<String>, DescriptionError> {
    let raw = match reader.read_text(start.name()) {
        Ok(raw) => raw,
        Err(e) => {
            return Err(DescriptionError::Malformed {
                position: reader.error_position() as u64,
                message: e.to_string(),
            })
        }
    };
    let decoded = html_escape::decode_html_entities(&raw);
    let trimmed = decoded.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

fn apply_field(
    desc: &mut DeviceDescription,
    service: Option<&mut ServiceEntry>,
    field: Field,
    text: Option<String>,
) {
    let Some(text) = text else { return };

    match (field, service) {
        (Field::FriendlyName, _) => {
            desc.friendly_name.get_or_insert(text);
        }
        (Field::DeviceType, _) => {
            if desc.device_type.is_none() {
                desc.device_type = Some(text.clone());
            }
            desc.device_types.push(text);
        }
        (Field::Udn, _) => {
            desc.udn.get_or_insert(text);
        }
        (Field::UrlBase, _) => {
            desc.url_base.get_or_insert(text);
        }
        (Field::ServiceType, Some(s)) => s.service_type = Some(text),
        (Field::ServiceId, Some(s)) => s.service_id = Some(text),
        (Field::ControlUrl, Some(s)) => s.control_url = Some(text),
        (Field::ScpdUrl, Some(s)) => s.scpd_url = Some(text),
        (Field::EventSubUrl, Some(s)) => s.event_sub_url = Some(text),
        // Service fields outside a <service> block carry no meaning.
        (_, None) => {}
    }
}

/// Resolves a possibly-relative URL from a description document.
///
/// Absolute URLs are returned unchanged. Relative ones are resolved against
/// `url_base` when the document declares one, otherwise against the
/// scheme, host and port of `location`.
#[must_use]
pub fn resolve_url(location: &str, url_base: Option<&str>, relative: &str) -> Option<String> {
    if let Ok(absolute) = Url::parse(relative) {
        if absolute.has_host() {
            return Some(absolute.to_string());
        }
    }

    let base = match url_base.and_then(|b| Url::parse(b).ok()).filter(Url::has_host) {
        Some(base) => base,
        None => origin_of(location)?,
    };

    base.join(relative).ok().map(String::from)
}

/// Returns `scheme://host:port/` of a URL.
fn origin_of(location: &str) -> Option<Url> {
    let mut url = Url::parse(location).ok()?;
    if !url.has_host() {
        return None;
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Some(url)
}
