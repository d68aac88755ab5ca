use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle of one connection: `Connected -> Disconnecting -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Connected,
    Disconnecting(DisconnectCause),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    ReadClosed,
    ReadError,
    WriteError,
    Evicted,
    /// The receiving side was dropped before the hub noticed.
    QueueClosed,
    HubStopped,
}

impl DisconnectCause {
    pub fn as_str(self) -> &'static str {
        match self {
            DisconnectCause::ReadClosed => "read_closed",
            DisconnectCause::ReadError => "read_error",
            DisconnectCause::WriteError => "write_error",
            DisconnectCause::Evicted => "evicted",
            DisconnectCause::QueueClosed => "queue_closed",
            DisconnectCause::HubStopped => "hub_stopped",
        }
    }
}

impl ListenerState {
    /// First cause wins; later causes are ignored.
    pub fn disconnect(self, cause: DisconnectCause) -> Self {
        match self {
            ListenerState::Connected => ListenerState::Disconnecting(cause),
            other => other,
        }
    }

    /// Only a disconnecting listener closes; a connected one passes through
    /// `Disconnecting` first.
    pub fn close(self, cause: DisconnectCause) -> Self {
        match self {
            ListenerState::Connected => ListenerState::Disconnecting(cause),
            ListenerState::Disconnecting(_) | ListenerState::Closed => ListenerState::Closed,
        }
    }

    pub fn is_closed(self) -> bool {
        matches!(self, ListenerState::Closed)
    }
}

/// Receiving end of one registered listener.
///
/// `recv` yields broadcasts in hub order and returns `None` once the hub has
/// dropped this listener, whether by unregistration, eviction or shutdown.
#[derive(Debug)]
pub struct Listener {
    id: ListenerId,
    outbound: mpsc::Receiver<Bytes>,
}

impl Listener {
    pub(crate) fn new(id: ListenerId, outbound: mpsc::Receiver<Bytes>) -> Self {
        Self { id, outbound }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Bytes> {
        self.outbound.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.outbound.try_recv().ok()
    }
}
