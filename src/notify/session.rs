//! Per-connection read and write units.
//!
//! Each connection gets one writer task draining its outbound queue onto the
//! socket and one read loop rebroadcasting whatever the client sends. Either
//! side ending tears the whole listener down.

use std::fmt::Display;

use axum::extract::ws::Message;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, info, warn};

use super::hub::HubHandle;
use super::listener::{DisconnectCause, Listener, ListenerId, ListenerState};

const SOURCE: &str = "notify::session";

/// Registers a listener for one connection and serves it until either side
/// ends.
///
/// Every inbound text or binary frame is broadcast to all listeners. Close
/// frames, read errors, write errors and eviction all unregister the
/// listener; the connection halves are released on every path.
pub async fn serve_listener<R, W, E>(hub: HubHandle, mut reader: R, writer: W)
where
    R: Stream<Item = Result<Message, E>> + Unpin + Send,
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display + Send,
    E: Display + Send,
{
    let listener = hub.register().await;
    let id = listener.id();
    let mut state = ListenerState::Connected;
    info!(target_module = SOURCE, listener = %id, "Listener connected");

    let mut writer_task = tokio::spawn(write_loop(hub.clone(), listener, writer));
    let mut writer_finished = false;

    let cause = tokio::select! {
        cause = read_loop(&hub, &mut reader, id) => cause,
        joined = &mut writer_task => {
            writer_finished = true;
            joined.unwrap_or(DisconnectCause::WriteError)
        }
    };

    state = state.disconnect(cause);
    debug!(target_module = SOURCE, listener = %id, state = ?state, "Listener disconnecting");

    hub.unregister(id).await;
    if !writer_finished {
        // Unregistering closes the queue, which ends the writer.
        if let Err(err) = writer_task.await {
            warn!(target_module = SOURCE, listener = %id, error = %err, "Writer task failed");
        }
    }
    drop(reader);

    state = state.close(cause);
    info!(
        target_module = SOURCE,
        listener = %id,
        cause = cause.as_str(),
        state = ?state,
        "Listener closed"
    );
}

async fn read_loop<R, E>(hub: &HubHandle, reader: &mut R, id: ListenerId) -> DisconnectCause
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                hub.broadcast(Bytes::copy_from_slice(text.as_str().as_bytes()))
                    .await;
            }
            Ok(Message::Binary(data)) => hub.broadcast(data).await,
            Ok(Message::Close(_)) => return DisconnectCause::ReadClosed,
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(err) => {
                debug!(target_module = SOURCE, listener = %id, error = %err, "Read failed");
                return DisconnectCause::ReadError;
            }
        }
    }
    DisconnectCause::ReadClosed
}

async fn write_loop<W>(hub: HubHandle, mut listener: Listener, mut writer: W) -> DisconnectCause
where
    W: Sink<Message> + Unpin,
    W::Error: Display + Send,
{
    let id = listener.id();
    while let Some(bytes) = listener.recv().await {
        if let Err(err) = writer.send(frame_for(bytes)).await {
            debug!(target_module = SOURCE, listener = %id, error = %err, "Write failed");
            hub.unregister(id).await;
            return DisconnectCause::WriteError;
        }
    }

    if let Err(err) = writer.close().await {
        debug!(target_module = SOURCE, listener = %id, error = %err, "Close failed");
    }
    if hub.is_running() {
        DisconnectCause::Evicted
    } else {
        DisconnectCause::HubStopped
    }
}

fn frame_for(bytes: Bytes) -> Message {
    match std::str::from_utf8(&bytes) {
        Ok(text) => Message::Text(text.into()),
        Err(_) => Message::Binary(bytes),
    }
}
