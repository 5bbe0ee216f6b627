// GET/POST handlers: version, status, config, devices, diagnostics

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use super::AppState;
use crate::models::{ConfigurationUpdate, Diagnostics};
use crate::settings::SettingsError;
use crate::version::{NAME, VERSION};

/// GET /version: returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// GET /api/status: liveness plus the numbers a status bar shows.
pub(super) async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
        "running": state.sampler_stats.is_running(),
        "connections": state.hub.subscriber_count(),
        "configVersion": state.settings.version(),
    }))
}

/// GET /api/config
pub(super) async fn get_config_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.settings.current().as_ref().clone())
}

/// POST /api/config: partial update; omitted fields keep their value.
pub(super) async fn update_config_handler(
    State(state): State<AppState>,
    Json(update): Json<ConfigurationUpdate>,
) -> impl IntoResponse {
    let result = if update.persist {
        // Saving touches the filesystem.
        let settings = state.settings.clone();
        match tokio::task::spawn_blocking(move || settings.update(&update)).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    operation = "update_config",
                    "settings update task failed"
                );
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": e.to_string() })),
                );
            }
        }
    } else {
        state.settings.update(&update)
    };

    match result {
        Ok(version) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "version": version,
                "config": state.settings.current().as_ref(),
            })),
        ),
        Err(SettingsError::Validation(e)) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": e.to_string(),
                "field": e.field(),
            })),
        ),
        Err(SettingsError::Persist {
            version,
            path,
            source,
        }) => {
            tracing::warn!(
                error = %source,
                path = %path.display(),
                version,
                operation = "persist_settings",
                "settings applied but not saved"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": format!("settings not saved to {}: {}", path.display(), source),
                    "version": version,
                })),
            )
        }
    }
}

/// GET /api/devices: volumes and GPUs the settings UI can select.
pub(super) async fn devices_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.sources.inventory().await)
}

/// GET /api/diagnostics
pub(super) async fn diagnostics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(Diagnostics {
        config_version: state.settings.version(),
        sampler: state.sampler_stats.diagnostics(),
        subscribers: state.hub.diagnostics(),
    })
}
