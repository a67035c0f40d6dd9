//! Low-level SOAP 1.1 transport for UPnP control.
//!
//! This module handles envelope building, the HTTP round-trip and response
//! parsing. The AVTransport actions built on top of it live in
//! `av_transport.rs`. Nothing here retries; retry policy belongs to callers.

use std::fmt;
use std::time::{Duration, Instant};

use reqwest::Client;
use thiserror::Error;

use super::xml::{escape_xml, extract_xml_text};
use crate::protocol_constants::{SOAP_CONTENT_TYPE, SOAP_ENCODING_STYLE, SOAP_ENVELOPE_NS};

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Details of a SOAP fault body, including the UPnP error block if present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoapFault {
    pub fault_code: Option<String>,
    pub fault_string: Option<String>,
    /// UPnP `errorCode` (e.g. 701 "Transition not available").
    pub error_code: Option<String>,
    pub error_description: Option<String>,
}

impl fmt::Display for SoapFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self
            .fault_string
            .as_deref()
            .or(self.fault_code.as_deref())
            .unwrap_or("Unknown SOAP fault");
        write!(f, "{}", summary)?;
        match (&self.error_code, &self.error_description) {
            (Some(code), Some(desc)) => write!(f, " (UPnP error {}: {})", code, desc),
            (Some(code), None) => write!(f, " (UPnP error {})", code),
            (None, Some(desc)) => write!(f, " ({})", desc),
            (None, None) => Ok(()),
        }
    }
}

/// Errors that can occur during SOAP operations.
#[derive(Debug, Error)]
pub enum SoapError {
    /// HTTP request failed (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Device returned a non-success HTTP status without a SOAP fault.
    #[error("HTTP error {0}: {1}")]
    HttpStatus(u16, String),

    /// Device returned a SOAP fault response.
    #[error("SOAP fault (HTTP {status}): {fault}")]
    Fault { status: u16, fault: SoapFault },

    /// A successful response lacked the requested field.
    #[error("Response has no <{0}> element")]
    MissingField(String),
}

/// Convenient Result alias for SOAP operations.
pub type SoapResult<T> = Result<T, SoapError>;

impl SoapError {
    /// Returns true if the request timed out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, SoapError::Http(e) if e.is_timeout())
    }

    /// Returns the UPnP error code of a fault, if any.
    #[must_use]
    pub fn upnp_error_code(&self) -> Option<&str> {
        match self {
            SoapError::Fault { fault, .. } => fault.error_code.as_deref(),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Builds a SOAP 1.1 envelope for `action` in the `service_type` namespace.
///
/// Argument values are XML-escaped; names are emitted as given. The envelope
/// is a single line because some renderers reject leading whitespace before
/// the root element.
#[must_use]
pub fn build_envelope(service_type: &str, action: &str, args: &[(&str, &str)]) -> String {
    let mut body = format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="{}" s:encodingStyle="{}"><s:Body><u:{} xmlns:u="{}">"#,
        SOAP_ENVELOPE_NS, SOAP_ENCODING_STYLE, action, service_type
    );

    for (k, v) in args {
        body.push_str(&format!("<{k}>{}</{k}>", escape_xml(v)));
    }

    body.push_str(&format!("</u:{}></s:Body></s:Envelope>", action));
    body
}

/// Returns the `SOAPAction` header value (quoted, per SOAP 1.1).
#[must_use]
pub fn soap_action_header(service_type: &str, action: &str) -> String {
    format!("\"{}#{}\"", service_type, action)
}

/// Extracts fault details from a response body.
///
/// Returns `None` if the body contains no `Fault` element.
#[must_use]
pub fn parse_fault(xml: &str) -> Option<SoapFault> {
    if !xml.contains("Fault") {
        return None;
    }
    let fault = SoapFault {
        fault_code: extract_xml_text(xml, "faultcode"),
        fault_string: extract_xml_text(xml, "faultstring"),
        error_code: extract_xml_text(xml, "errorCode"),
        error_description: extract_xml_text(xml, "errorDescription"),
    };
    if fault == SoapFault::default() {
        return None;
    }
    Some(fault)
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Sends SOAP actions to a control URL.
///
/// Each call is independent; the client holds no per-device state.
#[derive(Clone)]
pub struct SoapClient {
    client: Client,
}

impl SoapClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Invokes `action` and returns the response body.
    ///
    /// Any 2xx status is success. Other statuses become [`SoapError::Fault`]
    /// when the body carries a fault, or [`SoapError::HttpStatus`] otherwise.
    pub async fn invoke(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        args: &[(&str, &str)],
        timeout: Duration,
    ) -> SoapResult<String> {
        let body = build_envelope(service_type, action, args);

        log::info!("[SOAP] {} -> {} (body: {} bytes)", action, control_url, body.len());
        log::debug!("[SOAP] Request body: {}", body);

        let start = Instant::now();
        let res = self
            .client
            .post(control_url)
            .header("Content-Type", SOAP_CONTENT_TYPE)
            .header("SOAPAction", soap_action_header(service_type, action))
            .body(body)
            .timeout(timeout)
            .send()
            .await;

        log::info!(
            "[SOAP] {} completed in {:?}: {:?}",
            action,
            start.elapsed(),
            res.as_ref().map(|r| r.status())
        );

        let res = res?;
        let status = res.status();
        let response_text = res.text().await?;

        if status.is_success() {
            return Ok(response_text);
        }

        match parse_fault(&response_text) {
            Some(fault) => {
                log::warn!("[SOAP] {} fault: {}", action, fault);
                Err(SoapError::Fault {
                    status: status.as_u16(),
                    fault,
                })
            }
            None => Err(SoapError::HttpStatus(status.as_u16(), response_text)),
        }
    }

    /// Invokes a query action and extracts `field` from the response.
    pub async fn invoke_query(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        args: &[(&str, &str)],
        field: &str,
        timeout: Duration,
    ) -> SoapResult<String> {
        let body = self
            .invoke(control_url, service_type, action, args, timeout)
            .await?;
        extract_xml_text(&body, field).ok_or_else(|| SoapError::MissingField(field.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const AVT: &str = "urn:schemas-upnp-org:service:AVTransport:1";

    /// Reads the text of `element` back through a real XML parser.
    fn parse_back(xml: &str, element: &str) -> String {
        let mut reader = Reader::from_str(xml);
        loop {
            match reader.read_event().unwrap() {
                Event::Start(e) if e.local_name().as_ref() == element.as_bytes() => {
                    let raw = reader.read_text(e.name()).unwrap();
                    return html_escape::decode_html_entities(&raw).to_string();
                }
                Event::Eof => panic!("element {} not found", element),
                _ => {}
            }
        }
    }

    #[test]
    fn envelope_wraps_namespaced_action() {
        let body = build_envelope(AVT, "Play", &[("InstanceID", "0"), ("Speed", "1")]);
        assert!(body.starts_with(r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope"#));
        assert!(body.contains(r#"<u:Play xmlns:u="urn:schemas-upnp-org:service:AVTransport:1">"#));
        assert!(body.contains("<InstanceID>0</InstanceID><Speed>1</Speed>"));
        assert!(body.ends_with("</u:Play></s:Body></s:Envelope>"));
    }

    #[test]
    fn envelope_escapes_stream_url() {
        let url = r#"http://host/s?a=1&b=<2>&c="3"&d='4'"#;
        let body = build_envelope(AVT, "SetAVTransportURI", &[("CurrentURI", url)]);
        assert!(!body.contains("a=1&b"));
        assert!(body.contains("a=1&amp;b=&lt;2&gt;&amp;c=&quot;3&quot;&amp;d=&apos;4&apos;"));
        assert_eq!(parse_back(&body, "CurrentURI"), url);
    }

    #[test]
    fn soap_action_header_is_quoted() {
        assert_eq!(
            soap_action_header(AVT, "Stop"),
            "\"urn:schemas-upnp-org:service:AVTransport:1#Stop\""
        );
    }

    #[test]
    fn parse_fault_extracts_upnp_error() {
        let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring><detail><UPnPError xmlns="urn:schemas-upnp-org:control-1-0"><errorCode>701</errorCode><errorDescription>Transition not available</errorDescription></UPnPError></detail></s:Fault></s:Body></s:Envelope>"#;
        let fault = parse_fault(xml).unwrap();
        assert_eq!(fault.fault_code.as_deref(), Some("s:Client"));
        assert_eq!(fault.error_code.as_deref(), Some("701"));
        assert_eq!(
            fault.to_string(),
            "UPnPError (UPnP error 701: Transition not available)"
        );
    }

    #[test]
    fn parse_fault_ignores_plain_bodies() {
        assert!(parse_fault("<html>Internal Error</html>").is_none());
    }

    #[tokio::test]
    async fn invoke_sends_required_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ctl"))
            .and(header("Content-Type", "text/xml; charset=\"utf-8\""))
            .and(header(
                "SOAPAction",
                "\"urn:schemas-upnp-org:service:AVTransport:1#Play\"",
            ))
            .and(body_string_contains("<Speed>1</Speed>"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<ok/>"))
            .expect(1)
            .mount(&server)
            .await;

        let client = SoapClient::new(Client::new());
        let body = client
            .invoke(
                &format!("{}/ctl", server.uri()),
                AVT,
                "Play",
                &[("InstanceID", "0"), ("Speed", "1")],
                Duration::from_secs(3),
            )
            .await
            .unwrap();
        assert_eq!(body, "<ok/>");
    }

    #[tokio::test]
    async fn any_2xx_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = SoapClient::new(Client::new());
        assert!(client
            .invoke(&server.uri(), AVT, "Stop", &[], Duration::from_secs(3))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn fault_response_is_reported() {
        let server = MockServer::start().await;
        let fault = "<s:Envelope><s:Body><s:Fault><faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring><detail><UPnPError><errorCode>714</errorCode></UPnPError></detail></s:Fault></s:Body></s:Envelope>";
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string(fault))
            .mount(&server)
            .await;

        let client = SoapClient::new(Client::new());
        let err = client
            .invoke(&server.uri(), AVT, "Play", &[], Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(matches!(err, SoapError::Fault { status: 500, .. }));
        assert_eq!(err.upnp_error_code(), Some("714"));
    }

    #[tokio::test]
    async fn non_2xx_without_fault_is_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
            .mount(&server)
            .await;

        let client = SoapClient::new(Client::new());
        let err = client
            .invoke(&server.uri(), AVT, "Play", &[], Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(matches!(err, SoapError::HttpStatus(404, _)));
    }

    #[tokio::test]
    async fn slow_device_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = SoapClient::new(Client::new());
        let err = client
            .invoke(&server.uri(), AVT, "Play", &[], Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn invoke_query_extracts_field() {
        let server = MockServer::start().await;
        let response = r#"<?xml version="1.0"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><u:GetTransportInfoResponse xmlns:u="urn:schemas-upnp-org:service:AVTransport:1"><CurrentTransportState>PLAYING</CurrentTransportState><CurrentTransportStatus>OK</CurrentTransportStatus><CurrentSpeed>1</CurrentSpeed></u:GetTransportInfoResponse></s:Body></s:Envelope>"#;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(response))
            .mount(&server)
            .await;

        let client = SoapClient::new(Client::new());
        let state = client
            .invoke_query(
                &server.uri(),
                AVT,
                "GetTransportInfo",
                &[("InstanceID", "0")],
                "CurrentTransportState",
                Duration::from_secs(8),
            )
            .await
            .unwrap();
        assert_eq!(state, "PLAYING");
    }

    #[tokio::test]
    async fn invoke_query_missing_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<r/>"))
            .mount(&server)
            .await;

        let client = SoapClient::new(Client::new());
        let err = client
            .invoke_query(
                &server.uri(),
                AVT,
                "GetTransportInfo",
                &[],
                "CurrentTransportState",
                Duration::from_secs(8),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SoapError::MissingField(_)));
    }
}
