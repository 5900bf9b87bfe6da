//! WebSocket relay of state-change broadcasts.
//!
//! Each connection subscribes to the store's broadcast channel and forwards
//! every message as a JSON text frame. A connection that falls further
//! behind than the channel buffer receives a `refresh` message instead of
//! the dropped ones. The server pings every 30 seconds to keep idle
//! proxies from closing the socket.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;

use crate::api::ApiContext;
use crate::states::StateChangeMessage;

/// Ping interval.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// `GET /ws/states`
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(ctx): State<ApiContext>) -> impl IntoResponse {
    // Subscribe before the upgrade completes so nothing published in between is lost.
    let rx = ctx.core.states.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, rx))
}

/// What to forward for one receive result. `None` ends the relay.
pub(crate) fn relay_message(
    received: Result<StateChangeMessage, RecvError>,
) -> Option<StateChangeMessage> {
    match received {
        Ok(message) => Some(message),
        Err(RecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "Dashboard consumer lagged, sending refresh");
            Some(StateChangeMessage::refresh())
        }
        Err(RecvError::Closed) => None,
    }
}

async fn handle_socket(socket: WebSocket, mut rx: Receiver<StateChangeMessage>) {
    let (mut sink, mut stream) = socket.split();
    tracing::info!("Dashboard consumer connected");

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some(message) = relay_message(received) else {
                    break;
                };
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to encode state change");
                        continue;
                    }
                };
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    // The feed is one-way; anything the consumer sends is ignored.
                    Some(Ok(_)) => {}
                }
            }
            _ = heartbeat.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
    tracing::info!("Dashboard consumer disconnected");
}
