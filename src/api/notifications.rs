//! WebSocket delivery channel for reminders.
//!
//! One socket per user is live at a time. Connecting registers the socket
//! with the reminder hub (superseding any earlier one) and triggers a
//! catch-up pass; the socket then forwards every payload the dispatcher
//! pushes until the client leaves or a newer connection replaces it.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};

use super::auth;
use super::routes::AppState;
use super::types::{ServerMessage, SocketParams};

/// Keepalive ping period.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket endpoint for reminder notifications
pub async fn notifications_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<SocketParams>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let user_id =
        match auth::resolve_socket_user(&headers, params.user_id.as_deref(), &state.config) {
            Ok(id) => id,
            Err(rejection) => return rejection.into_response(),
        };

    ws.protocols(["reminders"])
        .on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let (key, mut reminders) = state.reminders.on_connect(&user_id).await;
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ping.tick().await;

    loop {
        tokio::select! {
            payload = reminders.recv() => {
                let Some(payload) = payload else {
                    // Superseded by a newer connection for this user.
                    tracing::debug!(user_id = %key.user_id, connection_id = %key.id, "Closing superseded socket");
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                };
                let text = match serde_json::to_string(&ServerMessage::from(payload)) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("Failed to encode reminder: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Clients have nothing to say; pongs and stray frames are ignored.
                    Some(Ok(_)) => {}
                }
            }
            _ = ping.tick() => {
                if ws_sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.reminders.on_disconnect(&key).await;
}
