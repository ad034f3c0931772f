use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::services::hub::NotificationHub;

/// Identifier used when the handshake carries no `userId` parameter.
const DEFAULT_USER_ID: &str = "aloha";

/// GET /ws — upgrade to WebSocket and register with the notification hub.
///
/// The user identifier comes from the `userId` query parameter of the
/// handshake; connections without one are filed under a fixed default.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let user_id = params
        .get("userId")
        .cloned()
        .unwrap_or_else(|| DEFAULT_USER_ID.to_string());

    ws.on_upgrade(move |socket| handle_socket(socket, state.hub.clone(), user_id))
}

/// Manage one WebSocket connection after upgrade.
///
/// Registers with the hub, pushes the welcome acknowledgement, then runs a
/// sender task forwarding hub messages to the sink while this task drains
/// inbound frames. The protocol is server-push only: inbound messages are
/// accepted and dropped. On disconnect the connection is removed from the
/// hub unconditionally.
async fn handle_socket(socket: WebSocket, hub: Arc<NotificationHub>, user_id: String) {
    let conn_id = Uuid::new_v4();
    tracing::info!(conn_id = %conn_id, user_id = %user_id, "WebSocket connected");

    let mut rx = hub.subscribe(&user_id, conn_id).await;

    let (mut sink, mut stream) = socket.split();

    let welcome = welcome_message(&user_id);
    if sink.send(Message::Text(welcome.into())).await.is_err() {
        hub.unsubscribe(conn_id).await;
        return;
    }

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(_) => {
                // Inbound frames are not interpreted.
            }
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    hub.unsubscribe(conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, user_id = %user_id, "WebSocket disconnected");
}

/// Welcome acknowledgement echoing the resolved user identifier.
fn welcome_message(user_id: &str) -> String {
    serde_json::json!({
        "type": "ALOHA, WELCOME ABOARD",
        "userId": user_id,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_welcome_echoes_user_id() {
        assert_eq!(
            welcome_message("alice"),
            r#"{"type":"ALOHA, WELCOME ABOARD","userId":"alice"}"#
        );
    }

    #[test]
    fn test_welcome_stays_valid_json_for_hostile_user_id() {
        let raw = r#"bob","x":"y"#;
        let parsed: serde_json::Value =
            serde_json::from_str(&welcome_message(raw)).expect("welcome must be valid JSON");
        assert_eq!(parsed["userId"], raw);
        assert_eq!(parsed["type"], "ALOHA, WELCOME ABOARD");
    }
}
