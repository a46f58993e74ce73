//! WebSocket upgrade and per-connection plumbing.
//!
//! The hub only sees an opaque delivery handle; this module owns the socket
//! lifecycle around it: a forward task draining the handle's channel into
//! the socket, and a read loop that blocks until the remote end closes or
//! errors. Every exit path unregisters the connection so the registry never
//! holds a stale entry.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use courier_common::error::AppError;
use courier_hub::{Client, Hub};

use crate::state::AppState;

/// Messages buffered per connection before pushes start failing.
const CONNECTION_BUFFER: usize = 32;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: String,
}

/// GET /ws — Upgrade to a WebSocket push connection for `user_id`.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    validate_user_id(&query.user_id)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, query.user_id, state.hub.clone())))
}

/// A blank `user_id` would register an entry no push can ever reach; reject
/// it before the upgrade.
fn validate_user_id(user_id: &str) -> Result<(), AppError> {
    if user_id.trim().is_empty() {
        return Err(AppError::Validation("user_id is required".to_string()));
    }
    Ok(())
}

async fn handle_socket(socket: WebSocket, user_id: String, hub: Hub) {
    tracing::info!(user_id = %user_id, "WebSocket connection opened");

    let (tx, mut rx) = mpsc::channel::<Value>(CONNECTION_BUFFER);
    hub.register(Client {
        user_id: user_id.clone(),
        sender: tx,
    });

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Forward hub pushes to the socket as JSON text frames.
    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(text) => {
                    if ws_sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize push message");
                }
            }
        }
    });

    // The connection is push-only; inbound frames are drained and ignored.
    // This loop is what keeps the registration alive.
    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    hub.unregister(&user_id);
    send_task.abort();
    tracing::info!(user_id = %user_id, "WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_user_id_rejected_before_upgrade() {
        assert!(validate_user_id("user-1").is_ok());

        assert!(validate_user_id("").is_err());
        assert!(validate_user_id("   ").is_err());
    }
}
