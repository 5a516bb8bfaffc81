use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};

use crate::loghub::LogSubscriber;
use crate::server::error::ApiError;
use crate::server::ServerState;

/// Upgrade to a WebSocket and relay the process's log stream, one line per
/// text frame. The slug is resolved before the upgrade so unknown processes
/// get a plain 404.
pub(crate) async fn attach_console(
    State(state): State<Arc<ServerState>>,
    Path(slug): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let subscriber = state
        .registry
        .subscribe(&slug)
        .await
        .ok_or_else(|| ApiError::not_found(format!("no process {slug:?}")))?;
    Ok(ws.on_upgrade(move |socket| stream_console(socket, subscriber)))
}

async fn stream_console(socket: WebSocket, mut subscriber: LogSubscriber) {
    let (mut sink, mut stream) = socket.split();

    // Forward hub lines until the hub closes or the peer goes away.
    let write = async {
        while let Some(entry) = subscriber.next().await {
            if sink.send(Message::Text(entry.line.into())).await.is_err() {
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    };

    // Drain the peer side so pings are answered and closes are seen.
    let read = async {
        while let Some(Ok(message)) = stream.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    };

    tokio::select! {
        _ = write => {}
        _ = read => {}
    }
}
