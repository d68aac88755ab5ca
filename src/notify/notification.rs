use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::hub::HubHandle;

const SOURCE: &str = "notify::notification";

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Change notice pushed to every listener.
///
/// Serializes as `{"type": ..., "message": ..., <fields>...}`. Consumers are
/// expected to ignore fields they do not know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Notification {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            fields: Map::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Embeds a serialized snapshot under `name`.
    pub fn payload<T: Serialize + ?Sized>(
        mut self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<Self, NotificationError> {
        let value = serde_json::to_value(value)?;
        self.fields.insert(name.into(), value);
        Ok(self)
    }

    pub fn to_bytes(&self) -> Result<Bytes, NotificationError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

/// Serializes notifications and hands them to the hub.
///
/// Publishing never fails the caller: an unencodable notification is logged
/// and abandoned.
#[derive(Clone)]
pub struct Notifier {
    hub: HubHandle,
}

impl Notifier {
    pub fn new(hub: HubHandle) -> Self {
        Self { hub }
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub async fn publish(&self, notification: Notification) {
        match notification.to_bytes() {
            Ok(bytes) => {
                debug!(
                    target_module = SOURCE,
                    kind = %notification.kind,
                    bytes = bytes.len(),
                    "Publishing notification"
                );
                self.hub.broadcast(bytes).await;
            }
            Err(err) => abandon(&notification, &err),
        }
    }

    /// Publishes `notification` with `payload` embedded under `name`.
    pub async fn publish_with<T: Serialize + ?Sized>(
        &self,
        notification: Notification,
        name: &str,
        payload: &T,
    ) {
        let kind = notification.kind.clone();
        match notification.payload(name, payload) {
            Ok(notification) => self.publish(notification).await,
            Err(err) => warn!(
                target_module = SOURCE,
                kind = %kind,
                error = %err,
                "Notification payload could not be encoded; broadcast abandoned"
            ),
        }
    }
}

fn abandon(notification: &Notification, err: &NotificationError) {
    warn!(
        target_module = SOURCE,
        kind = %notification.kind,
        error = %err,
        "Notification could not be encoded; broadcast abandoned"
    );
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::super::hub::{Hub, HubConfig};
    use super::*;

    #[test]
    fn wire_shape_is_flat() {
        let notification = Notification::new("quality", "Quality created")
            .field("movieID", "m1")
            .field("episodeID", "e1");

        let value: Value =
            serde_json::from_slice(&notification.to_bytes().expect("encode")).expect("json");
        assert_eq!(
            value,
            json!({
                "type": "quality",
                "message": "Quality created",
                "movieID": "m1",
                "episodeID": "e1",
            })
        );
    }

    #[test]
    fn payload_with_non_string_keys_fails() {
        let mut bad = HashMap::new();
        bad.insert((1, 2), "pair");
        let err = Notification::new("movie", "x").payload("movies", &bad);
        assert!(matches!(err, Err(NotificationError::Encode(_))));
    }

    #[tokio::test]
    async fn unencodable_payload_is_not_broadcast() {
        let handle = Hub::spawn(HubConfig::default());
        let notifier = Notifier::new(handle.clone());
        let mut listener = handle.register().await;

        let mut bad = HashMap::new();
        bad.insert((1, 2), "pair");
        notifier
            .publish_with(Notification::new("movie", "broken"), "movies", &bad)
            .await;
        notifier.publish(Notification::new("movie", "ok")).await;

        let received = listener.recv().await.expect("second notification");
        let value: Value = serde_json::from_slice(&received).expect("json");
        assert_eq!(value["message"], "ok");
        assert_eq!(handle.snapshot().broadcasts, 1);
    }
}
