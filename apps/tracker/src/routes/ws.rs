use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use tracing::{error, warn};

use crate::broadcast::Broadcaster;
use crate::state::AppState;

/// GET /ws
/// Subscribes to `update` events. The latest state is sent right after connecting.
pub async fn handle_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_subscriber(socket, state.broadcaster))
}

async fn serve_subscriber(mut socket: WebSocket, broadcaster: Broadcaster) {
    let (id, mut updates) = broadcaster.subscribe().await;
    if let Err(e) = broadcaster.notify_one(id).await {
        warn!("Could not catch up subscriber {id}: {e}");
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(event) => {
                    let payload = match serde_json::to_string(event.as_ref()) {
                        Ok(payload) => payload,
                        Err(e) => {
                            error!("Could not serialize update {}: {e}", event.timestamp);
                            continue;
                        }
                    };
                    if socket.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                // broadcaster closed: server is shutting down
                None => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    broadcaster.unsubscribe(id).await;
}
