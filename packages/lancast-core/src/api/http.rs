//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to [`CastService`](crate::services::CastService).

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::response::{api_ok, api_success};
use crate::api::AppState;
use crate::error::{LancastError, LancastResult};
use crate::events::BroadcastEvent;
use crate::protocol_constants::APP_NAME;
use crate::services::CastRequest;

const SSE_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ProbeRequest {
    location: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/state", get(get_state))
        .route("/api/devices", get(list_devices))
        .route("/api/devices/probe", post(probe_device))
        .route("/api/devices/{uuid}", get(get_device))
        .route(
            "/api/discovery",
            post(start_discovery).delete(stop_discovery),
        )
        .route("/api/cast", post(start_cast))
        .route("/api/stop", post(stop_cast))
        .route("/api/events", get(event_stream))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe.
async fn health_check() -> impl IntoResponse {
    api_success(json!({
        "status": "ok",
        "service": APP_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Returns the playback, discovery and proxy state.
async fn get_state(State(state): State<AppState>) -> impl IntoResponse {
    api_success(state.cast.snapshot())
}

async fn list_devices(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({ "devices": state.cast.devices() }))
}

async fn get_device(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> LancastResult<impl IntoResponse> {
    let device = state
        .cast
        .device(&uuid)
        .ok_or(LancastError::DeviceNotFound(uuid))?;
    Ok(api_success(device))
}

/// Registers a renderer from an explicit description URL.
async fn probe_device(
    State(state): State<AppState>,
    Json(payload): Json<ProbeRequest>,
) -> LancastResult<impl IntoResponse> {
    let device = state.cast.probe(&payload.location).await?;
    Ok(api_success(device))
}

/// Starts a discovery session, replacing any running one.
async fn start_discovery(State(state): State<AppState>) -> impl IntoResponse {
    state.cast.start_discovery();
    api_ok()
}

async fn stop_discovery(State(state): State<AppState>) -> impl IntoResponse {
    state.cast.stop_discovery();
    api_ok()
}

async fn start_cast(
    State(state): State<AppState>,
    Json(payload): Json<CastRequest>,
) -> LancastResult<impl IntoResponse> {
    let outcome = state.cast.cast(payload).await?;
    Ok(api_success(outcome))
}

async fn stop_cast(State(state): State<AppState>) -> LancastResult<impl IntoResponse> {
    state.cast.stop().await?;
    Ok(api_ok())
}

/// Server-sent events: one `discovery` or `playback` event per broadcast.
///
/// Subscribers that fall behind skip the missed events.
async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.cast.subscribe()).filter_map(|result| match result {
        Ok(event) => {
            let name = match &event {
                BroadcastEvent::Discovery(_) => "discovery",
                BroadcastEvent::Playback(_) => "playback",
            };
            match serde_json::to_string(&event) {
                Ok(data) => Some(Ok(Event::default().event(name).data(data))),
                Err(e) => {
                    log::warn!("[API] Failed to serialize event: {}", e);
                    None
                }
            }
        }
        Err(BroadcastStreamRecvError::Lagged(n)) => {
            log::warn!("[API] Event subscriber lagged, skipped {} events", n);
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEPALIVE_INTERVAL))
}
