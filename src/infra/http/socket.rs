use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::Response;
use futures::StreamExt;

use crate::notify::serve_listener;

use super::AppState;

/// Upgrades to a WebSocket and serves it as a hub listener.
pub async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| async move {
        let (writer, reader) = socket.split();
        serve_listener(hub, reader, writer).await;
    })
}
