// HTTP + WebSocket routes

mod http;
mod ws;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::hub::BroadcastHub;
use crate::sampler::SamplerStats;
use crate::settings::SettingsStore;
use crate::sources::HostSources;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) hub: Arc<BroadcastHub>,
    pub(crate) settings: Arc<SettingsStore>,
    pub(crate) sampler_stats: Arc<SamplerStats>,
    pub(crate) sources: Arc<HostSources>,
}

pub fn app(
    hub: Arc<BroadcastHub>,
    settings: Arc<SettingsStore>,
    sampler_stats: Arc<SamplerStats>,
    sources: Arc<HostSources>,
) -> Router {
    let state = AppState {
        hub,
        settings,
        sampler_stats,
        sources,
    };
    Router::new()
        .route("/", get(|| async { "resmon: local hardware telemetry" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/status", get(http::status_handler)) // GET /api/status
        .route("/api/config", get(http::get_config_handler)) // GET /api/config
        .route("/api/config", post(http::update_config_handler)) // POST /api/config
        .route("/api/devices", get(http::devices_handler)) // GET /api/devices
        .route("/api/diagnostics", get(http::diagnostics_handler)) // GET /api/diagnostics
        .route("/ws", get(ws::ws_snapshots)) // WS /ws
        .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any))
        .with_state(state)
}
