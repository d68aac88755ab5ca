use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use metrics::{counter, gauge};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use super::listener::{DisconnectCause, Listener, ListenerId};

const SOURCE: &str = "notify::hub";

const METRIC_LISTENERS: &str = "marquee_hub_listeners";
const METRIC_BROADCAST: &str = "marquee_hub_broadcast_total";
const METRIC_EVICTED: &str = "marquee_hub_evicted_total";

const DEFAULT_LISTENER_QUEUE: usize = 64;
const DEFAULT_COMMAND_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Outbound queue capacity per listener. A full queue means eviction.
    pub listener_queue: usize,
    /// Capacity of the hub's command queue.
    pub command_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listener_queue: DEFAULT_LISTENER_QUEUE,
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

impl From<&crate::config::HubSettings> for HubConfig {
    fn from(settings: &crate::config::HubSettings) -> Self {
        Self {
            listener_queue: settings.listener_queue.get(),
            command_buffer: settings.command_buffer.get(),
        }
    }
}

enum HubCommand {
    Register {
        id: ListenerId,
        outbound: mpsc::Sender<Bytes>,
    },
    Unregister(ListenerId),
    Broadcast(Bytes),
}

/// Counters written only by the hub loop.
#[derive(Default)]
struct HubStats {
    listeners: AtomicUsize,
    broadcasts: AtomicU64,
    delivered: AtomicU64,
    evicted: AtomicU64,
}

/// Point-in-time view of the hub counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HubSnapshot {
    pub listeners: usize,
    pub broadcasts: u64,
    /// Successful enqueues across all listeners and broadcasts.
    pub delivered: u64,
    pub evicted: u64,
}

/// The coordinating loop. Owns the listener set; nothing else touches it.
pub struct Hub {
    config: HubConfig,
    commands: mpsc::Receiver<HubCommand>,
    listeners: HashMap<ListenerId, mpsc::Sender<Bytes>>,
    stats: Arc<HubStats>,
}

/// Cloneable entry point to a running [`Hub`].
///
/// The hub stops once every handle has been dropped.
#[derive(Clone)]
pub struct HubHandle {
    listener_queue: usize,
    commands: mpsc::Sender<HubCommand>,
    stats: Arc<HubStats>,
}

impl Hub {
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(config.command_buffer.max(1));
        let stats = Arc::new(HubStats::default());

        let hub = Self {
            config,
            commands: commands_rx,
            listeners: HashMap::new(),
            stats: stats.clone(),
        };
        let handle = HubHandle {
            listener_queue: config.listener_queue.max(1),
            commands: commands_tx,
            stats,
        };
        (hub, handle)
    }

    /// Builds a hub and runs its loop on the current tokio runtime.
    pub fn spawn(config: HubConfig) -> HubHandle {
        let (hub, handle) = Self::new(config);
        tokio::spawn(hub.run());
        handle
    }

    /// Serves commands in the order they were sent until every
    /// [`HubHandle`] is gone.
    ///
    /// Register, unregister and broadcast share one queue, so a listener
    /// registered after a broadcast was queued never receives it.
    pub async fn run(mut self) {
        info!(
            target_module = SOURCE,
            listener_queue = self.config.listener_queue,
            command_buffer = self.config.command_buffer,
            "Notification hub started"
        );

        while let Some(command) = self.commands.recv().await {
            match command {
                HubCommand::Register { id, outbound } => self.register(id, outbound),
                HubCommand::Unregister(id) => self.unregister(id),
                HubCommand::Broadcast(message) => self.broadcast(message),
            }
        }

        let remaining = self.listeners.len();
        for id in self.listeners.keys() {
            log_removal(*id, DisconnectCause::HubStopped);
        }
        self.listeners.clear();
        self.publish_listener_count();
        info!(
            target_module = SOURCE,
            closed_listeners = remaining,
            "Notification hub stopped"
        );
    }

    fn register(&mut self, id: ListenerId, outbound: mpsc::Sender<Bytes>) {
        self.listeners.insert(id, outbound);
        self.publish_listener_count();
        info!(
            target_module = SOURCE,
            listener = %id,
            listeners = self.listeners.len(),
            "Listener registered"
        );
    }

    fn unregister(&mut self, id: ListenerId) {
        if self.listeners.remove(&id).is_none() {
            debug!(
                target_module = SOURCE,
                listener = %id,
                "Unregister for unknown listener ignored"
            );
            return;
        }
        self.publish_listener_count();
        info!(
            target_module = SOURCE,
            listener = %id,
            listeners = self.listeners.len(),
            "Listener unregistered"
        );
    }

    fn broadcast(&mut self, message: Bytes) {
        let mut delivered = 0_u64;
        let mut dropped = Vec::new();

        for (id, outbound) in &self.listeners {
            match outbound.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => dropped.push((*id, DisconnectCause::Evicted)),
                Err(TrySendError::Closed(_)) => dropped.push((*id, DisconnectCause::QueueClosed)),
            }
        }

        let mut evicted = 0_u64;
        for (id, cause) in dropped {
            self.listeners.remove(&id);
            if cause == DisconnectCause::Evicted {
                evicted += 1;
                warn!(
                    target_module = SOURCE,
                    listener = %id,
                    queue = self.config.listener_queue,
                    "Evicted slow listener with full outbound queue"
                );
            }
            log_removal(id, cause);
        }

        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.stats.delivered.fetch_add(delivered, Ordering::Relaxed);
        counter!(METRIC_BROADCAST).increment(1);
        if evicted > 0 {
            self.stats.evicted.fetch_add(evicted, Ordering::Relaxed);
            counter!(METRIC_EVICTED).increment(evicted);
        }
        self.publish_listener_count();

        debug!(
            target_module = SOURCE,
            bytes = message.len(),
            delivered,
            evicted,
            "Broadcast fanned out"
        );
    }

    fn publish_listener_count(&self) {
        let count = self.listeners.len();
        self.stats.listeners.store(count, Ordering::Relaxed);
        gauge!(METRIC_LISTENERS).set(count as f64);
    }
}

fn log_removal(id: ListenerId, cause: DisconnectCause) {
    debug!(
        target_module = SOURCE,
        listener = %id,
        cause = cause.as_str(),
        "Listener removed by hub"
    );
}

impl HubHandle {
    /// Adds a new listener. It receives only broadcasts sent after this call.
    ///
    /// If the hub has stopped, the returned listener is already closed.
    pub async fn register(&self) -> Listener {
        let id = ListenerId::new();
        let (outbound, inbound) = mpsc::channel(self.listener_queue);
        if self
            .commands
            .send(HubCommand::Register { id, outbound })
            .await
            .is_err()
        {
            debug!(target_module = SOURCE, listener = %id, "Hub stopped; listener closed");
        }
        Listener::new(id, inbound)
    }

    /// Removes a listener and closes its queue. Unknown ids are ignored.
    pub async fn unregister(&self, id: ListenerId) {
        let _ = self.commands.send(HubCommand::Unregister(id)).await;
    }

    /// Queues `message` for every currently registered listener.
    pub async fn broadcast(&self, message: Bytes) {
        if self.commands.send(HubCommand::Broadcast(message)).await.is_err() {
            debug!(target_module = SOURCE, "Hub stopped; broadcast dropped");
        }
    }

    pub fn snapshot(&self) -> HubSnapshot {
        HubSnapshot {
            listeners: self.stats.listeners.load(Ordering::Relaxed),
            broadcasts: self.stats.broadcasts.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            evicted: self.stats.evicted.load(Ordering::Relaxed),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}
