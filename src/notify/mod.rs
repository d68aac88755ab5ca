//! Live change notifications.
//!
//! A single [`Hub`] loop owns the set of connected listeners. Everything else
//! talks to it through a cloneable [`HubHandle`]. Delivery is best effort:
//! a listener whose outbound queue is full is evicted rather than waited on.

mod hub;
mod listener;
mod notification;
mod session;

pub use hub::{Hub, HubConfig, HubHandle, HubSnapshot};
pub use listener::{DisconnectCause, Listener, ListenerId, ListenerState};
pub use notification::{Notification, NotificationError, Notifier};
pub use session::serve_listener;
