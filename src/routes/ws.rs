// WebSocket handler: one delivery worker per subscriber

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::{Duration, Instant, timeout};

use super::AppState;
use crate::aggregator::now_millis;
use crate::hub::SubscriberHandle;

pub(super) const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
pub(super) const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_MESSAGE: &str = "Server is shutting down";

#[derive(Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    kind: String,
}

/// Registers the subscriber before upgrading so a hub that is shutting down can refuse with 503.
pub(super) async fn ws_snapshots(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let handle = match state.hub.subscribe() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::info!(error = %e, "websocket subscription refused");
            return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
        }
    };
    ws.on_upgrade(move |socket| async move {
        let id = handle.id();
        if let Err(e) = stream_snapshots(socket, handle, state).await {
            tracing::info!(subscriber = id, "snapshot stream error: {}", e);
        }
    })
}

async fn send_text<S>(sender: &mut S, text: String) -> bool
where
    S: Sink<Message> + Unpin,
{
    matches!(
        timeout(WS_SEND_TIMEOUT, sender.send(Message::Text(text.into()))).await,
        Ok(Ok(()))
    )
}

async fn stream_snapshots(
    socket: WebSocket,
    mut handle: SubscriberHandle,
    state: AppState,
) -> anyhow::Result<()> {
    let id = handle.id();
    let (mut sender, mut receiver) = socket.split();
    tracing::info!(subscriber = id, "client connected to snapshot stream");

    let welcome = serde_json::json!({
        "type": "connected",
        "subscriber": id,
        "configVersion": state.settings.version(),
    });
    if !send_text(&mut sender, serde_json::to_string(&welcome)?).await {
        return Ok(());
    }
    handle.activate();

    let mut ping_interval =
        tokio::time::interval_at(Instant::now() + WS_PING_INTERVAL, WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            frame = handle.recv() => {
                // None: this queue is drained and closed.
                let Some(frame) = frame else {
                    if !state.hub.is_accepting() {
                        let notice = serde_json::json!({
                            "type": "server_shutdown",
                            "message": SHUTDOWN_MESSAGE,
                        });
                        send_text(&mut sender, notice.to_string()).await;
                    }
                    break;
                };
                if !send_text(&mut sender, frame.json.to_string()).await {
                    tracing::debug!(subscriber = id, sequence = frame.sequence, "send failed or timed out");
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = reply_to(text.as_str(), &handle, &state);
                        if !send_text(&mut sender, serde_json::to_string(&reply)?).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(subscriber = id, error = %e, "websocket receive error");
                        break;
                    }
                }
            }
            _ = ping_interval.tick() => {
                let r = timeout(WS_SEND_TIMEOUT, sender.send(Message::Ping(Bytes::new()))).await;
                if !matches!(r, Ok(Ok(()))) {
                    break;
                }
            }
        }
    }

    handle.close();
    let _ = timeout(WS_SEND_TIMEOUT, sender.close()).await;
    tracing::info!(
        subscriber = id,
        dropped_frames = handle.dropped_frames(),
        "client disconnected from snapshot stream"
    );
    Ok(())
}

fn reply_to(text: &str, handle: &SubscriberHandle, state: &AppState) -> serde_json::Value {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) if msg.kind == "ping" => serde_json::json!({
            "type": "pong",
            "timestamp": now_millis(),
        }),
        Ok(msg) if msg.kind == "get_status" => serde_json::json!({
            "type": "status",
            "running": state.sampler_stats.is_running(),
            "connections": state.hub.subscriber_count(),
            "configVersion": state.settings.version(),
            "droppedFrames": handle.dropped_frames(),
        }),
        Ok(msg) => serde_json::json!({
            "type": "error",
            "message": format!("unknown message type: {}", msg.kind),
        }),
        Err(e) => serde_json::json!({
            "type": "error",
            "message": format!("invalid message: {}", e),
        }),
    }
}
