use std::{sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    debug_handler,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::AppState;

use super::{
    coordinator::Coordinator,
    events::{ClientCommand, ServerEvent},
    registry::ConnectionId,
};

const PING_INTERVAL: Duration = Duration::from_secs(30);

#[debug_handler(state = AppState)]
pub async fn chat_ws(
    State(coordinator): State<Arc<Coordinator>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |stream| handle_socket(stream, coordinator))
}

async fn handle_socket(stream: WebSocket, coordinator: Arc<Coordinator>) {
    let (handle, rx) = coordinator.registry().open().await;
    tracing::debug!(%handle, "socket opened");

    let (sender, mut receiver) = stream.split();
    let mut writer = tokio::spawn(write_events(sender, rx));

    loop {
        tokio::select! {
            frame = receiver.next() => {
                let Some(Ok(frame)) = frame else { break };
                if !handle_frame(&coordinator, handle, frame).await {
                    break;
                }
            }
            // registry dropped us (sweep) or the socket stopped accepting writes
            _ = &mut writer => break,
        }
    }

    writer.abort();
    if let Err(err) = coordinator.disconnect(handle).await {
        tracing::warn!(%handle, error = %err, "disconnect cleanup failed");
    }
}

/// Returns false once the peer asked to close.
async fn handle_frame(coordinator: &Coordinator, handle: ConnectionId, frame: WsMessage) -> bool {
    let command = match frame {
        WsMessage::Text(_) | WsMessage::Binary(_) => {
            serde_json::from_slice::<ClientCommand>(&frame.into_data())
        }
        WsMessage::Close(_) => return false,
        WsMessage::Ping(_) | WsMessage::Pong(_) => {
            coordinator.registry().touch(handle).await;
            return true;
        }
    };

    let command = match command {
        Ok(command) => command,
        Err(err) => {
            tracing::debug!(%handle, error = %err, "malformed frame");
            let reason = format!("malformed command: {err}");
            coordinator.registry().send_to(handle, ServerEvent::Error { reason }).await;
            return true;
        }
    };

    if let Err(err) = coordinator.dispatch(handle, command).await {
        tracing::debug!(%handle, error = %err, "command failed");
        coordinator.registry().send_to(handle, ServerEvent::Error { reason: err.reason() }).await;
    }

    true
}

async fn write_events(
    mut sender: futures_util::stream::SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<ServerEvent>,
) {
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(err) => {
                        tracing::warn!(error = %err, "could not encode event");
                        continue;
                    }
                };
                if sender.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if sender.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = sender.close().await;
}
