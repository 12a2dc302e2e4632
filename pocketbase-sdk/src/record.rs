//! Record-level realtime subscriptions.
//!
//! A collection's records are published under the collection name (every
//! record) and under `collection/record_id` (a single record). Events carry
//! `{"action": "...", "record": {...}}`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use realtime::SubscriptionOptions;

use crate::client::PocketBase;
use crate::error::{Result, SdkError};

/// Topic that selects every record of a collection
pub const ALL_RECORDS: &str = "*";

/// What happened to the record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordAction {
    Create,
    Update,
    Delete,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A single record change delivered to record subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSubscription {
    #[serde(default)]
    pub action: RecordAction,
    #[serde(default = "empty_object")]
    pub record: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Default for RecordSubscription {
    fn default() -> Self {
        Self {
            action: RecordAction::Unknown,
            record: empty_object(),
        }
    }
}

impl RecordSubscription {
    /// Interpret a decoded event payload; anything unexpected yields the
    /// default (`Unknown`, `{}`)
    pub fn from_payload(payload: &Value) -> Self {
        match serde_json::from_value::<RecordSubscription>(payload.clone()) {
            Ok(event) if event.record.is_object() => event,
            Ok(event) => Self {
                action: event.action,
                record: empty_object(),
            },
            Err(e) => {
                tracing::warn!("Unexpected record event payload: {}", e);
                Self::default()
            }
        }
    }

    /// Deserialize the record into a typed model
    pub fn record_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.record.clone())
    }

    pub fn record_id(&self) -> Option<&str> {
        self.record.get("id").and_then(Value::as_str)
    }
}

/// Realtime topic for `topic` in `collection`: the collection itself for
/// `*`, otherwise the record id under the collection
pub fn record_topic(collection: &str, topic: &str) -> String {
    if topic == ALL_RECORDS {
        collection.to_string()
    } else {
        format!("{}/{}", collection, topic)
    }
}

/// Realtime access to the records of one collection
pub struct RecordService<'a> {
    client: &'a PocketBase,
    collection: String,
}

impl<'a> RecordService<'a> {
    pub(crate) fn new(client: &'a PocketBase, collection: impl Into<String>) -> Self {
        Self {
            client,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn topic_key(&self, topic: &str) -> String {
        record_topic(&self.collection, topic)
    }

    /// Subscribe to changes of every record (`"*"`) or a single record id.
    ///
    /// Resolves once the server accepted the subscription.
    pub async fn subscribe<F>(
        &self,
        topic: &str,
        callback: F,
        options: Option<SubscriptionOptions>,
    ) -> Result<()>
    where
        F: Fn(RecordSubscription) + Send + Sync + 'static,
    {
        if topic.is_empty() {
            return Err(SdkError::InvalidTopic(format!(
                "Missing record topic for collection {}",
                self.collection
            )));
        }

        let key = self.topic_key(topic);
        tracing::debug!("Subscribing to record topic {}", key);

        self.client
            .realtime()
            .subscribe(
                &key,
                move |payload: &Value| callback(RecordSubscription::from_payload(payload)),
                options,
            )
            .await?;

        Ok(())
    }

    /// Remove the subscriptions for `topic`, or every subscription of this
    /// collection when `None`
    pub async fn unsubscribe(&self, topic: Option<&str>) -> Result<()> {
        let realtime = self.client.realtime();

        match topic {
            Some(topic) => {
                let key = self.topic_key(topic);
                realtime.unsubscribe(Some(key.as_str())).await?;
            }
            None => {
                realtime.unsubscribe(Some(&self.collection)).await?;
                realtime
                    .unsubscribe_by_prefix(&format!("{}/", self.collection))
                    .await?;
            }
        }

        Ok(())
    }
}
