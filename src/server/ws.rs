//! WebSocket endpoint: one hub subscription per connected socket

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use super::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let snapshot = match state.ledger.instruments() {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "Failed to read snapshot for new subscriber");
            return;
        }
    };

    let (id, mut updates) = state.hub.subscribe(snapshot);
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            update = updates.recv() => {
                match update {
                    Some(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    // The hub dropped us (slow consumer); close the socket
                    None => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Clients only listen on this feed; ignore anything else
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.hub.unsubscribe(&id);
    debug!(subscriber = %id, "WebSocket closed");
}
