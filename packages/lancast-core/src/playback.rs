//! Single-session playback controller with a transport watchdog.
//!
//! State machine: `Idle -> Loading -> Playing -> {Stopped | Error}`. A new
//! [`PlaybackController::play`] restarts at `Loading` from any state.
//!
//! The watchdog is a supervised task owned by the session. It is spawned in
//! the same critical section that moves the state to `Playing`, and every
//! transition it makes is tagged with the generation it was spawned for, so a
//! watchdog from a replaced session can never touch the new one.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::PlaybackEvent;
use crate::protocol_constants::PLAY_SETTLE_DELAY_MS;
use crate::upnp::{format_didl_lite, AvTransport, DiscoveredDevice, SoapError, StreamMetadata};
use crate::utils::now_millis;

/// Reason reported when the watchdog gives up on a session.
pub const TRANSPORT_NOT_PLAYING: &str = "transport not playing";

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Playback state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading,
    Playing,
    Stopped,
    Error,
}

/// Named playback failures.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("SetAVTransportURI failed")]
    SetUri(#[source] SoapError),

    #[error("Play failed")]
    Play(#[source] SoapError),

    #[error("Stop failed")]
    Stop(#[source] SoapError),

    /// `release()` or a newer `play()` took over while this one was in flight.
    #[error("playback request superseded")]
    Superseded,
}

impl PlaybackError {
    fn soap_detail(&self) -> Option<String> {
        let e = match self {
            Self::SetUri(e) | Self::Play(e) | Self::Stop(e) => e,
            Self::Superseded => return None,
        };
        if e.is_timeout() {
            return Some("renderer did not answer in time".to_string());
        }
        Some(match e.upnp_error_code() {
            Some(code) => format!("UPnP error {}: {}", code, e),
            None => e.to_string(),
        })
    }
}

/// Watchdog tuning.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Delay between two `GetTransportInfo` polls.
    pub poll_interval: Duration,
    /// Consecutive non-playing polls before the session is failed.
    pub max_failures: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_failures: 3,
        }
    }
}

struct Watchdog {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Watchdog {
    /// Cancels the task and waits until it has exited.
    async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

#[derive(Default)]
struct Session {
    id: String,
    device: Option<DiscoveredDevice>,
    state: PlaybackState,
    generation: u64,
    watchdog: Option<Watchdog>,
}

/// State shared between the controller and its watchdog task.
struct Shared {
    session: Mutex<Session>,
    events: broadcast::Sender<PlaybackEvent>,
}

impl Shared {
    fn emit(&self, event: PlaybackEvent) {
        tracing::debug!(?event, "playback_event");
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Moves to `state` if `generation` is still current.
    fn transition(&self, generation: u64, state: PlaybackState) -> bool {
        let session_id = {
            let mut session = self.session.lock();
            if session.generation != generation {
                return false;
            }
            session.state = state;
            session.id.clone()
        };

        log::debug!("[Playback] -> {:?}", state);
        self.emit(PlaybackEvent::StateChanged {
            session_id,
            state,
            timestamp: now_millis(),
        });
        true
    }

    fn emit_error(&self, session_id: String, reason: &str, detail: Option<String>) {
        self.emit(PlaybackEvent::Error {
            session_id,
            reason: reason.to_string(),
            detail,
            timestamp: now_millis(),
        });
    }
}

/// Drives one renderer through a casting session.
pub struct PlaybackController {
    transport: Arc<dyn AvTransport>,
    config: WatchdogConfig,
    shared: Arc<Shared>,
    /// Serialises `play` and `stop` sequences.
    op_lock: tokio::sync::Mutex<()>,
}

impl PlaybackController {
    #[must_use]
    pub fn new(transport: Arc<dyn AvTransport>, config: WatchdogConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            config,
            shared: Arc::new(Shared {
                session: Mutex::new(Session::default()),
                events,
            }),
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Subscribes to playback events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.shared.events.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.shared.session.lock().state
    }

    /// The device of the current (or last) session.
    #[must_use]
    pub fn current_device(&self) -> Option<DiscoveredDevice> {
        self.shared.session.lock().device.clone()
    }

    /// Identifier of the current session, empty before the first `play`.
    #[must_use]
    pub fn session_id(&self) -> String {
        self.shared.session.lock().id.clone()
    }

    /// Returns true while a watchdog task is supervising the session.
    #[must_use]
    pub fn watchdog_active(&self) -> bool {
        self.shared
            .session
            .lock()
            .watchdog
            .as_ref()
            .is_some_and(|w| !w.cancel.is_cancelled() && !w.handle.is_finished())
    }

    /// Points `device` at `stream_url` with empty metadata and starts playback.
    pub async fn play(
        &self,
        device: DiscoveredDevice,
        stream_url: &str,
    ) -> Result<(), PlaybackError> {
        self.start_session(device, stream_url, None).await
    }

    /// Like [`play`](Self::play), but first offers DIDL-Lite metadata.
    ///
    /// Renderers that reject the metadata get one retry with empty metadata.
    pub async fn play_with_metadata(
        &self,
        device: DiscoveredDevice,
        stream_url: &str,
        metadata: &StreamMetadata,
    ) -> Result<(), PlaybackError> {
        let didl = format_didl_lite(stream_url, metadata);
        self.start_session(device, stream_url, Some(didl)).await
    }

    async fn start_session(
        &self,
        device: DiscoveredDevice,
        stream_url: &str,
        didl: Option<String>,
    ) -> Result<(), PlaybackError> {
        let _op = self.op_lock.lock().await;

        let (previous, generation, session_id) = {
            let mut session = self.shared.session.lock();
            session.generation += 1;
            session.id = uuid::Uuid::new_v4().to_string();
            session.device = Some(device.clone());
            (
                session.watchdog.take(),
                session.generation,
                session.id.clone(),
            )
        };

        // The old watchdog must be gone before SetAVTransportURI goes out.
        if let Some(watchdog) = previous {
            watchdog.shutdown().await;
        }

        log::info!(
            "[Playback] Casting to {} ({}): {}",
            device.friendly_name,
            device.remote_ip,
            stream_url
        );
        self.shared.transition(generation, PlaybackState::Loading);

        if let Err(e) = self.set_uri(&device, stream_url, didl.as_deref()).await {
            return Err(self.fail(generation, session_id, PlaybackError::SetUri(e)));
        }

        tokio::time::sleep(Duration::from_millis(PLAY_SETTLE_DELAY_MS)).await;

        if let Err(e) = self.transport.play(&device).await {
            return Err(self.fail(generation, session_id, PlaybackError::Play(e)));
        }

        {
            let mut session = self.shared.session.lock();
            if session.generation != generation {
                return Err(PlaybackError::Superseded);
            }
            session.state = PlaybackState::Playing;
            session.watchdog = Some(self.spawn_watchdog(
                generation,
                session_id.clone(),
                device.clone(),
            ));
        }

        log::info!("[Playback] Playing on {}", device.friendly_name);
        self.shared.emit(PlaybackEvent::StateChanged {
            session_id: session_id.clone(),
            state: PlaybackState::Playing,
            timestamp: now_millis(),
        });
        self.shared.emit(PlaybackEvent::Started {
            session_id,
            device_uuid: device.uuid,
            stream_url: stream_url.to_string(),
            timestamp: now_millis(),
        });
        Ok(())
    }

    async fn set_uri(
        &self,
        device: &DiscoveredDevice,
        stream_url: &str,
        didl: Option<&str>,
    ) -> Result<(), SoapError> {
        if let Some(didl) = didl {
            match self
                .transport
                .set_av_transport_uri(device, stream_url, didl)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::warn!(
                        "[Playback] SetAVTransportURI with metadata rejected ({}), retrying without",
                        e
                    );
                }
            }
        }
        self.transport
            .set_av_transport_uri(device, stream_url, "")
            .await
    }

    fn fail(&self, generation: u64, session_id: String, error: PlaybackError) -> PlaybackError {
        if !self.shared.transition(generation, PlaybackState::Error) {
            return PlaybackError::Superseded;
        }
        log::warn!(
            "[Playback] {}: {}",
            error,
            error.soap_detail().unwrap_or_default()
        );
        self.shared
            .emit_error(session_id, &error.to_string(), error.soap_detail());
        error
    }

    fn spawn_watchdog(
        &self,
        generation: u64,
        session_id: String,
        device: DiscoveredDevice,
    ) -> Watchdog {
        let cancel = CancellationToken::new();
        let task = WatchdogTask {
            transport: Arc::clone(&self.transport),
            shared: Arc::clone(&self.shared),
            config: self.config.clone(),
            cancel: cancel.clone(),
            generation,
            session_id,
            device,
        };
        Watchdog {
            cancel,
            handle: tokio::spawn(task.run()),
        }
    }

    /// Cancels the watchdog and sends Stop to `device`.
    ///
    /// On failure the state is left unchanged and the watchdog stays cancelled.
    pub async fn stop(&self, device: &DiscoveredDevice) -> Result<(), PlaybackError> {
        let _op = self.op_lock.lock().await;

        let (watchdog, generation, session_id) = {
            let mut session = self.shared.session.lock();
            (
                session.watchdog.take(),
                session.generation,
                session.id.clone(),
            )
        };
        if let Some(watchdog) = watchdog {
            watchdog.shutdown().await;
        }

        log::info!("[Playback] Stopping {}", device.friendly_name);
        match self.transport.stop(device).await {
            Ok(()) => {
                self.shared.transition(generation, PlaybackState::Stopped);
                self.shared.emit(PlaybackEvent::Stopped {
                    session_id,
                    device_uuid: device.uuid.clone(),
                    timestamp: now_millis(),
                });
                Ok(())
            }
            Err(e) => {
                let error = PlaybackError::Stop(e);
                log::warn!("[Playback] {}: {}", error, error.soap_detail().unwrap_or_default());
                self.shared
                    .emit_error(session_id, &error.to_string(), error.soap_detail());
                Err(error)
            }
        }
    }

    /// Cancels the watchdog and resets to `Idle`. Sends nothing to the renderer.
    pub fn release(&self) {
        let (watchdog, session_id) = {
            let mut session = self.shared.session.lock();
            session.generation += 1;
            session.state = PlaybackState::Idle;
            session.device = None;
            (session.watchdog.take(), session.id.clone())
        };
        if let Some(watchdog) = watchdog {
            watchdog.cancel.cancel();
        }

        log::debug!("[Playback] Released");
        self.shared.emit(PlaybackEvent::StateChanged {
            session_id,
            state: PlaybackState::Idle,
            timestamp: now_millis(),
        });
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        if let Some(watchdog) = self.shared.session.lock().watchdog.take() {
            watchdog.cancel.cancel();
        }
    }
}

struct WatchdogTask {
    transport: Arc<dyn AvTransport>,
    shared: Arc<Shared>,
    config: WatchdogConfig,
    cancel: CancellationToken,
    generation: u64,
    session_id: String,
    device: DiscoveredDevice,
}

impl WatchdogTask {
    async fn run(self) {
        log::debug!(
            "[Watchdog] Started for {} (every {:?}, limit {})",
            self.device.friendly_name,
            self.config.poll_interval,
            self.config.max_failures
        );
        let mut failures: u32 = 0;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }

            let polled = tokio::select! {
                () = self.cancel.cancelled() => break,
                r = self.transport.get_transport_info(&self.device) => r,
            };

            let observed = match polled {
                Ok(state) => {
                    if state.is_active() {
                        failures = 0;
                    } else {
                        failures += 1;
                    }
                    Some(state.to_string())
                }
                Err(e) if e.is_timeout() => {
                    log::warn!("[Watchdog] GetTransportInfo timed out");
                    failures += 1;
                    None
                }
                Err(e) => {
                    log::warn!("[Watchdog] GetTransportInfo failed: {}", e);
                    failures += 1;
                    None
                }
            };

            if failures > 0 {
                log::info!(
                    "[Watchdog] {} reports {} ({}/{})",
                    self.device.friendly_name,
                    observed.as_deref().unwrap_or("no answer"),
                    failures,
                    self.config.max_failures
                );
            }

            self.shared.emit(PlaybackEvent::TransportState {
                session_id: self.session_id.clone(),
                state: observed,
                consecutive_failures: failures,
                timestamp: now_millis(),
            });

            if failures >= self.config.max_failures {
                self.escalate();
                break;
            }
        }

        log::debug!("[Watchdog] Exited for {}", self.device.friendly_name);
    }

    fn escalate(&self) {
        {
            let mut session = self.shared.session.lock();
            if session.generation != self.generation || session.state != PlaybackState::Playing {
                return;
            }
            session.state = PlaybackState::Error;
            // Detach our own handle; the task ends right after this.
            session.watchdog = None;
        }

        log::warn!(
            "[Watchdog] {}: {} after {} polls",
            self.device.friendly_name,
            TRANSPORT_NOT_PLAYING,
            self.config.max_failures
        );
        self.shared.emit(PlaybackEvent::StateChanged {
            session_id: self.session_id.clone(),
            state: PlaybackState::Error,
            timestamp: now_millis(),
        });
        self.shared
            .emit_error(self.session_id.clone(), TRANSPORT_NOT_PLAYING, None);
    }
}
