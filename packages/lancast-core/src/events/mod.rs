//! Typed domain events.
//!
//! Discovery sessions deliver [`DiscoveryEvent`]s on their own `mpsc`
//! channel; the playback controller publishes [`PlaybackEvent`]s on a
//! `broadcast` channel. The control API merges both into
//! [`BroadcastEvent`]s for server-sent events.

use serde::Serialize;

use crate::playback::PlaybackState;
use crate::upnp::DiscoveredDevice;
use crate::utils::now_millis;

/// Events broadcast to API clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Events from a discovery session.
    Discovery(DiscoveryEvent),

    /// Events from the playback controller.
    Playback(PlaybackEvent),
}

/// Events emitted by one discovery session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DiscoveryEvent {
    /// A renderer passed all checks. Emitted at most once per device identity.
    DeviceFound {
        device: DiscoveredDevice,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The session hit a socket-level error and is ending.
    Error {
        message: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The session ended. Always the last event.
    Finished {
        /// Number of devices emitted during the session.
        found: usize,
        /// True if the session was cancelled before completing its rounds.
        cancelled: bool,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

impl DiscoveryEvent {
    pub(crate) fn device_found(device: DiscoveredDevice) -> Self {
        Self::DeviceFound {
            device,
            timestamp: now_millis(),
        }
    }

    pub(crate) fn error(message: String) -> Self {
        Self::Error {
            message,
            timestamp: now_millis(),
        }
    }

    pub(crate) fn finished(found: usize, cancelled: bool) -> Self {
        Self::Finished {
            found,
            cancelled,
            timestamp: now_millis(),
        }
    }
}

/// Events emitted by the playback controller.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlaybackEvent {
    /// The controller moved to a new state.
    StateChanged {
        #[serde(rename = "sessionId")]
        session_id: String,
        state: PlaybackState,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// Play succeeded and the watchdog is running.
    Started {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "deviceUuid")]
        device_uuid: String,
        /// The URL the renderer is pulling from.
        #[serde(rename = "streamUrl")]
        stream_url: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// Stop succeeded.
    Stopped {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "deviceUuid")]
        device_uuid: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// An action failed or the watchdog gave up.
    Error {
        #[serde(rename = "sessionId")]
        session_id: String,
        /// Short human-readable reason, e.g. "Play failed".
        reason: String,
        /// Underlying error detail, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// Result of one watchdog poll.
    TransportState {
        #[serde(rename = "sessionId")]
        session_id: String,
        /// Raw `CurrentTransportState`, or `None` if the poll failed.
        state: Option<String>,
        /// Consecutive non-playing polls so far.
        #[serde(rename = "consecutiveFailures")]
        consecutive_failures: u32,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

impl PlaybackEvent {
    /// Returns the session this event belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::StateChanged { session_id, .. }
            | Self::Started { session_id, .. }
            | Self::Stopped { session_id, .. }
            | Self::Error { session_id, .. }
            | Self::TransportState { session_id, .. } => session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_event_serializes_with_category() {
        let event = BroadcastEvent::Discovery(DiscoveryEvent::finished(2, false));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["category"], "discovery");
        assert_eq!(json["type"], "finished");
        assert_eq!(json["found"], 2);
        assert_eq!(json["cancelled"], false);
    }

    #[test]
    fn playback_error_omits_missing_detail() {
        let event = PlaybackEvent::Error {
            session_id: "s1".into(),
            reason: "Play failed".into(),
            detail: None,
            timestamp: 1,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["reason"], "Play failed");
        assert!(json.get("detail").is_none());
    }

    #[test]
    fn state_changed_serializes_state_name() {
        let event = PlaybackEvent::StateChanged {
            session_id: "s1".into(),
            state: PlaybackState::Playing,
            timestamp: 1,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stateChanged");
        assert_eq!(json["state"], "playing");
        assert_eq!(event.session_id(), "s1");
    }
}
