use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

/// Live update stream for one delivery: an initial snapshot frame when the
/// record exists, then every pushed row change for that id as JSON.
pub async fn delivery_ws_handler(
    ws: WebSocketUpgrade,
    Path(delivery_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, delivery_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, delivery_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    let rx = state.delivery_events_tx.subscribe();
    let snapshot = state.fetch_delivery(delivery_id);

    info!(%delivery_id, "delivery websocket client connected");

    let send_task = tokio::spawn(async move {
        if let Some(record) = snapshot {
            match serde_json::to_string(&record) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        return;
                    }
                }
                Err(err) => warn!(error = %err, "failed to serialize delivery snapshot"),
            }
        }

        let mut events = BroadcastStream::new(rx);
        while let Some(item) = events.next().await {
            // Lagged receivers just skip to the next push.
            let Ok(record) = item else { continue };
            if record.id != delivery_id {
                continue;
            }

            let json = match serde_json::to_string(&record) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize delivery for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(%delivery_id, "delivery websocket client disconnected");
}
