// Integration tests: HTTP and WebSocket endpoints

mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use resmon::aggregator::Aggregator;
use resmon::config::AppConfig;
use resmon::hub::BroadcastHub;
use resmon::models::Snapshot;
use resmon::routes;
use resmon::sampler::{self, SamplerConfig, SamplerDeps, SamplerStats};
use resmon::settings::SettingsStore;
use resmon::sources::HostSources;
use std::sync::Arc;
use tokio::time::Duration;

const TEST_CONFIG: &str = r#"
[server]
port = 8081
host = "127.0.0.1"

[sampler]
interval_ms = 1000
adapter_timeout_ms = 500
stats_log_interval_secs = 60

[hub]
queue_capacity = 8
"#;

struct TestApp {
    router: axum::Router,
    hub: Arc<BroadcastHub>,
    settings: Arc<SettingsStore>,
    stats: Arc<SamplerStats>,
}

fn test_app() -> TestApp {
    let config = AppConfig::load_from_str(TEST_CONFIG).unwrap();
    let hub = Arc::new(BroadcastHub::new(config.hub.queue_capacity));
    let settings = Arc::new(SettingsStore::new(config.initial_settings()));
    let stats = Arc::new(SamplerStats::default());
    let router = routes::app(
        hub.clone(),
        settings.clone(),
        stats.clone(),
        Arc::new(HostSources::new()),
    );
    TestApp {
        router,
        hub,
        settings,
        stats,
    }
}

/// Build TestServer with http_transport (required for WebSocket tests).
fn test_server_with_http() -> (TestServer, TestApp) {
    let app = test_app();
    let server = TestServer::builder()
        .http_transport()
        .build(app.router.clone())
        .unwrap();
    (server, app)
}

#[tokio::test]
async fn test_root_endpoint() {
    let app = test_app();
    let server = TestServer::new(app.router).unwrap();
    let response = server.get("/").await;
    response.assert_status_ok();
    response.assert_text("resmon: local hardware telemetry");
}

#[tokio::test]
async fn test_version_endpoint() {
    let app = test_app();
    let server = TestServer::new(app.router).unwrap();
    let response = server.get("/version").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(json.get("name").and_then(|v| v.as_str()), Some("resmon"));
    assert!(json.get("version").and_then(|v| v.as_str()).is_some());
}

#[tokio::test]
async fn test_status_endpoint() {
    let app = test_app();
    let server = TestServer::new(app.router).unwrap();
    let json: serde_json::Value = server.get("/api/status").await.json();
    assert_eq!(json["running"], false);
    assert_eq!(json["connections"], 0);
    assert_eq!(json["configVersion"], 1);
}

#[tokio::test]
async fn test_get_config_returns_current_generation() {
    let app = test_app();
    let server = TestServer::new(app.router).unwrap();
    let json: serde_json::Value = server.get("/api/config").await.json();
    assert_eq!(json["version"], 1);
    assert_eq!(json["intervalMs"], 1000);
    assert_eq!(
        json["enabledSources"],
        serde_json::json!(["cpu", "memory", "disk", "gpu"])
    );
    assert_eq!(json["selectedDisks"], serde_json::json!([]));
}

#[tokio::test]
async fn test_post_config_applies_partial_update() {
    let app = test_app();
    let settings = app.settings.clone();
    let server = TestServer::new(app.router).unwrap();

    let response = server
        .post("/api/config")
        .json(&serde_json::json!({ "intervalMs": 250, "enabledSources": ["cpu", "ram"] }))
        .await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(json["version"], 2);
    assert_eq!(json["config"]["intervalMs"], 250);
    assert_eq!(
        json["config"]["enabledSources"],
        serde_json::json!(["cpu", "memory"])
    );
    assert_eq!(settings.version(), 2);

    let json: serde_json::Value = server.get("/api/config").await.json();
    assert_eq!(json["intervalMs"], 250);
}

#[tokio::test]
async fn test_post_config_persist_writes_settings_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    let config = AppConfig::load_from_str(TEST_CONFIG).unwrap();
    let settings = Arc::new(SettingsStore::load(
        Some(path.clone()),
        config.initial_settings(),
    ));
    let router = routes::app(
        Arc::new(BroadcastHub::new(config.hub.queue_capacity)),
        settings,
        Arc::new(SamplerStats::default()),
        Arc::new(HostSources::new()),
    );
    let server = TestServer::new(router).unwrap();

    let response = server
        .post("/api/config")
        .json(&serde_json::json!({ "intervalMs": 1500, "persist": true }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<serde_json::Value>()["version"], 2);

    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved["intervalMs"], 1500);
    assert!(saved.get("version").is_none());
}

#[tokio::test]
async fn test_post_config_rejects_out_of_range_interval() {
    let app = test_app();
    let settings = app.settings.clone();
    let server = TestServer::new(app.router).unwrap();

    let response = server
        .post("/api/config")
        .json(&serde_json::json!({ "intervalMs": 50 }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let json: serde_json::Value = response.json();
    assert_eq!(json["field"], "intervalMs");
    assert!(json["error"].as_str().unwrap().contains("50"));
    assert_eq!(settings.version(), 1);
    assert_eq!(settings.current().settings.interval_ms, 1000);
}

#[tokio::test]
async fn test_post_config_rejects_unknown_source() {
    let app = test_app();
    let server = TestServer::new(app.router).unwrap();
    let response = server
        .post("/api/config")
        .json(&serde_json::json!({ "enabledSources": ["cpu", "fan"] }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let json: serde_json::Value = response.json();
    assert_eq!(json["field"], "enabledSources");
}

#[tokio::test]
async fn test_devices_endpoint_lists_arrays() {
    let app = test_app();
    let server = TestServer::new(app.router).unwrap();
    let response = server.get("/api/devices").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert!(json["volumes"].is_array());
    assert!(json["gpus"].is_array());
}

#[tokio::test]
async fn test_diagnostics_endpoint() {
    let app = test_app();
    let server = TestServer::new(app.router).unwrap();
    let json: serde_json::Value = server.get("/api/diagnostics").await.json();
    assert_eq!(json["configVersion"], 1);
    assert_eq!(json["sampler"]["state"], "stopped");
    assert_eq!(json["subscribers"], serde_json::json!([]));
}

// --- WebSocket message tests (require http_transport + ws feature) ---
// Receive until we get valid JSON (server may send Ping first).

async fn receive_first_json_text<T: serde::de::DeserializeOwned>(
    ws: &mut axum_test::TestWebSocket,
) -> T {
    let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(3);
    loop {
        let text = ws.receive_text().await;
        if let Ok(v) = serde_json::from_str::<T>(&text) {
            return v;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for JSON"
        );
    }
}

#[tokio::test]
async fn test_ws_sends_welcome_then_snapshots() {
    let (server, app) = test_server_with_http();
    let mut ws = server.get_websocket("/ws").await.into_websocket().await;

    let welcome: serde_json::Value = receive_first_json_text(&mut ws).await;
    assert_eq!(welcome["type"], "connected");
    assert_eq!(welcome["configVersion"], 1);
    assert_eq!(app.hub.subscriber_count(), 1);

    app.hub.publish(&Snapshot::empty(42, 1_000));
    let snapshot: serde_json::Value = receive_first_json_text(&mut ws).await;
    assert_eq!(snapshot["type"], "snapshot");
    assert_eq!(snapshot["sequence"], 42);
    assert!(snapshot.get("cpu").is_none());
}

#[tokio::test]
async fn test_ws_answers_ping_and_status() {
    let (server, _app) = test_server_with_http();
    let mut ws = server.get_websocket("/ws").await.into_websocket().await;
    let _welcome: serde_json::Value = receive_first_json_text(&mut ws).await;

    ws.send_json(&serde_json::json!({ "type": "ping" })).await;
    let pong: serde_json::Value = receive_first_json_text(&mut ws).await;
    assert_eq!(pong["type"], "pong");
    assert!(pong["timestamp"].as_u64().is_some());

    ws.send_json(&serde_json::json!({ "type": "get_status" })).await;
    let status: serde_json::Value = receive_first_json_text(&mut ws).await;
    assert_eq!(status["type"], "status");
    assert_eq!(status["connections"], 1);
    assert_eq!(status["configVersion"], 1);

    ws.send_json(&serde_json::json!({ "type": "reboot" })).await;
    let error: serde_json::Value = receive_first_json_text(&mut ws).await;
    assert_eq!(error["type"], "error");
}

#[tokio::test]
async fn test_ws_refused_after_hub_shutdown() {
    let (server, app) = test_server_with_http();
    app.hub.shutdown();
    let response = server.get_websocket("/ws").await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_ws_shutdown_delivers_queued_frames() {
    let (server, app) = test_server_with_http();
    let mut ws = server.get_websocket("/ws").await.into_websocket().await;
    let _welcome: serde_json::Value = receive_first_json_text(&mut ws).await;

    app.hub.publish(&Snapshot::empty(7, 0));
    app.hub.shutdown();

    let snapshot: serde_json::Value = receive_first_json_text(&mut ws).await;
    assert_eq!(snapshot["sequence"], 7);

    let notice: serde_json::Value = receive_first_json_text(&mut ws).await;
    assert_eq!(notice["type"], "server_shutdown");
    assert_eq!(notice["message"], "Server is shutting down");
}

#[tokio::test]
async fn test_ws_receives_sampled_snapshots() {
    let (server, app) = test_server_with_http();
    app.settings
        .update(&resmon::models::ConfigurationUpdate {
            interval_ms: Some(100),
            ..Default::default()
        })
        .unwrap();
    let handle = sampler::spawn(
        SamplerDeps {
            aggregator: Aggregator::new(common::all_fakes(), Duration::from_millis(500)),
            hub: app.hub.clone(),
            config_rx: app.settings.subscribe(),
            stats: app.stats.clone(),
        },
        SamplerConfig {
            stats_log_interval_secs: 60,
        },
    );

    let mut ws = server.get_websocket("/ws").await.into_websocket().await;
    let _welcome: serde_json::Value = receive_first_json_text(&mut ws).await;
    let snapshot: serde_json::Value = receive_first_json_text(&mut ws).await;
    assert_eq!(snapshot["type"], "snapshot");
    assert_eq!(snapshot["cpu"]["model"], "Test CPU");
    assert_eq!(snapshot["memory"]["total"], 100);
    assert_eq!(snapshot["gpus"][0]["index"], 0);

    let status: serde_json::Value = server.get("/api/status").await.json();
    assert_eq!(status["running"], true);

    handle.stop().await.unwrap();
}
