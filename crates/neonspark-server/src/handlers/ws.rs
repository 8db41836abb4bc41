//! WebSocket glue between axum sockets and the realtime hub.

use crate::server::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use neonspark_core::ClientConnection;
use std::sync::Arc;
use tracing::{debug, warn};

/// WebSocket for service status and request updates.
#[utoipa::path(
    get,
    path = "/ws/{client_id}",
    tag = "realtime",
    params(("client_id" = String, Path, description = "Caller-chosen client id")),
    responses((status = 101, description = "Switching protocols"))
)]
pub async fn websocket(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, state))
}

async fn handle_socket(socket: WebSocket, client_id: String, state: Arc<AppState>) {
    let ClientConnection {
        connection_id,
        mut receiver,
    } = state.hub.connect(&client_id).await;
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            outbound = receiver.recv() => match outbound {
                Some(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                // Dropped by the hub, or replaced by a newer connection.
                None => break,
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => state.hub.handle_text(&client_id, &text).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error for client {}: {}", client_id, e);
                    break;
                }
            },
        }
    }

    debug!("Closing socket for {}", client_id);
    state.hub.release(&client_id, connection_id).await;
}
