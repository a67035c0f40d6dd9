//! Centralized error types for the LanCast core library.
//!
//! This module provides a unified error handling system that:
//! - Maps every component error to a machine-readable code ([`ErrorCode`])
//! - Maps application errors to HTTP status codes
//! - Implements `IntoResponse` for JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::artwork::ArtworkError;
use crate::context::NetworkError;
use crate::playback::PlaybackError;
use crate::proxy::ProxyError;
use crate::upnp::{DescriptionError, DiscoveryError, SoapError};

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for DescriptionError {
    fn code(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "description_malformed",
            Self::Empty => "description_empty",
            Self::Truncated(_) => "description_truncated",
        }
    }
}

impl ErrorCode for DiscoveryError {
    fn code(&self) -> &'static str {
        match self {
            Self::SocketBind(_) => "socket_bind_failed",
            Self::SendSearch(_) => "ssdp_send_failed",
            Self::Receive(_) => "ssdp_receive_failed",
            Self::InvalidLocation(_) => "invalid_location",
            Self::DescriptionFetch { .. } => "description_fetch_failed",
            Self::DescriptionStatus { .. } => "description_http_error",
            Self::Description { source, .. } => source.code(),
            Self::NotRenderer(_) => "not_media_renderer",
            Self::NoAvTransport(_) => "no_av_transport",
        }
    }
}

impl ErrorCode for SoapError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::HttpStatus(_, _) => "http_error_status",
            Self::Fault { .. } => "soap_fault",
            Self::MissingField(_) => "soap_missing_field",
        }
    }
}

impl ErrorCode for PlaybackError {
    fn code(&self) -> &'static str {
        match self {
            Self::SetUri(_) => "set_uri_failed",
            Self::Play(_) => "play_failed",
            Self::Stop(_) => "stop_failed",
            Self::Superseded => "playback_superseded",
        }
    }
}

impl ErrorCode for ProxyError {
    fn code(&self) -> &'static str {
        match self {
            Self::Bind(_) => "proxy_bind_failed",
            Self::Network(_) => "network_error",
            Self::Client(_) => "http_client_failed",
            Self::NotRunning => "proxy_not_running",
        }
    }
}

impl ErrorCode for ArtworkError {
    fn code(&self) -> &'static str {
        match self {
            Self::Empty => "logo_empty",
            Self::Image(_) => "logo_invalid_image",
            Self::Io { .. } => "logo_read_failed",
            Self::Download(_) => "logo_download_failed",
            Self::DownloadStatus(_) => "logo_download_http_error",
        }
    }
}

/// Application-wide error type for the control API.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum LancastError {
    /// Discovery or probing failed.
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// A transport action on the renderer failed.
    #[error("Playback failed: {0}")]
    Playback(String),

    /// No renderer with this identity is known.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Stop was requested with no session.
    #[error("No active playback session")]
    NoActiveSession,

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The stream proxy is unavailable.
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// Logo could not be prepared or loaded.
    #[error("Artwork error: {0}")]
    Artwork(String),

    /// Network-related error (IP detection, connection issues).
    #[error("Network error: {0}")]
    Network(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Invalid configuration values.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LancastError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Discovery(_) => "discovery_failed",
            Self::Playback(_) => "playback_failed",
            Self::DeviceNotFound(_) => "device_not_found",
            Self::NoActiveSession => "no_active_session",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Proxy(_) => "proxy_error",
            Self::Artwork(_) => "artwork_error",
            Self::Network(_) => "network_error",
            Self::Internal(_) => "internal_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DeviceNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) | Self::Artwork(_) => StatusCode::BAD_REQUEST,
            Self::NoActiveSession => StatusCode::CONFLICT,
            Self::Discovery(_) | Self::Playback(_) => StatusCode::BAD_GATEWAY,
            Self::Proxy(_) | Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Network(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type LancastResult<T> = Result<T, LancastError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for LancastError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<DiscoveryError> for LancastError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::InvalidLocation(loc) => {
                Self::InvalidRequest(format!("invalid location URL: {loc}"))
            }
            other => Self::Discovery(other.to_string()),
        }
    }
}

impl From<PlaybackError> for LancastError {
    fn from(err: PlaybackError) -> Self {
        match &err {
            PlaybackError::SetUri(e) | PlaybackError::Play(e) | PlaybackError::Stop(e) => {
                Self::Playback(format!("{err}: {e}"))
            }
            PlaybackError::Superseded => Self::Playback(err.to_string()),
        }
    }
}

impl From<ProxyError> for LancastError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::Network(e) => Self::Network(e.to_string()),
            other => Self::Proxy(other.to_string()),
        }
    }
}

impl From<ArtworkError> for LancastError {
    fn from(err: ArtworkError) -> Self {
        Self::Artwork(err.to_string())
    }
}

impl From<NetworkError> for LancastError {
    fn from(err: NetworkError) -> Self {
        Self::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_not_found_maps_to_404() {
        let err = LancastError::DeviceNotFound("uuid:x".into());
        assert_eq!(err.code(), "device_not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_location_becomes_bad_request() {
        let err: LancastError = DiscoveryError::InvalidLocation("nope".into()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn playback_error_keeps_named_reason() {
        let err: LancastError =
            PlaybackError::Play(SoapError::HttpStatus(500, "Internal".into())).into();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.to_string().starts_with("Playback failed: Play failed"));
    }

    #[test]
    fn component_codes_are_stable() {
        assert_eq!(DescriptionError::Empty.code(), "description_empty");
        assert_eq!(
            DiscoveryError::Description {
                location: "http://x".into(),
                source: DescriptionError::Truncated(3),
            }
            .code(),
            "description_truncated"
        );
        assert_eq!(ProxyError::NotRunning.code(), "proxy_not_running");
        assert_eq!(ArtworkError::Empty.code(), "logo_empty");
    }
}
