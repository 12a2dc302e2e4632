//! Routing of inbound stream events to registered listeners.
//!
//! One `DispatchRouter` serves every connection: it looks up listeners by
//! event name at dispatch time, so subscribing or unsubscribing never touches
//! the stream itself.

use serde_json::{Map, Value};

use crate::error::RealtimeError;
use crate::registry::{invoke_listeners, SharedRegistry};
use crate::sse::SseEvent;

/// Routes events from the stream reader to the registry's listeners.
#[derive(Clone)]
pub struct DispatchRouter {
    registry: SharedRegistry,
}

impl DispatchRouter {
    pub fn new(registry: SharedRegistry) -> Self {
        Self { registry }
    }

    /// Decode `event` and invoke every listener registered for its name.
    ///
    /// Listeners run after the registry lock is released, so they may
    /// subscribe or unsubscribe from inside the callback. Returns how many
    /// listeners completed.
    pub fn route(&self, event: &SseEvent) -> usize {
        let listeners = match self.registry.lock() {
            Ok(registry) => registry.listeners_for(&event.event),
            Err(_) => {
                tracing::warn!("Dropping {} event: {}", event.event, RealtimeError::LockPoisoned);
                return 0;
            }
        };

        if listeners.is_empty() {
            tracing::trace!("No listeners for event {}", event.event);
            return 0;
        }

        let payload = decode_payload(&event.event, &event.data);
        invoke_listeners(&event.event, &listeners, &payload)
    }
}

/// Decode an event payload, falling back to an empty object.
///
/// Undecodable and `null` payloads both become `{}`; decode failures are
/// logged and never interrupt the stream.
pub fn decode_payload(topic: &str, data: &str) -> Value {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::Null) => Value::Object(Map::new()),
        Ok(value) => value,
        Err(e) => {
            let error = RealtimeError::Decode {
                topic: topic.to_string(),
                message: e.to_string(),
            };
            tracing::warn!("{}", error);
            Value::Object(Map::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SubscriptionRegistry;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_decode_payload() {
        assert_eq!(
            decode_payload("posts", r#"{"action":"update","record":{"id":"a"}}"#),
            json!({ "action": "update", "record": { "id": "a" } })
        );
        assert_eq!(decode_payload("posts", "not json"), json!({}));
        assert_eq!(decode_payload("posts", ""), json!({}));
        assert_eq!(decode_payload("posts", "null"), json!({}));
    }

    #[test]
    fn test_route_delivers_to_matching_topic_only() {
        let registry = SubscriptionRegistry::shared();
        let received = Arc::new(Mutex::new(Vec::new()));

        {
            let received = Arc::clone(&received);
            registry
                .lock()
                .unwrap()
                .add(
                    "posts",
                    Arc::new(move |payload: &Value| received.lock().unwrap().push(payload.clone())),
                    None,
                )
                .unwrap();
        }

        let router = DispatchRouter::new(Arc::clone(&registry));
        assert_eq!(router.route(&SseEvent::new("posts", r#"{"n":1}"#)), 1);
        assert_eq!(router.route(&SseEvent::new("users", r#"{"n":2}"#)), 0);
        assert_eq!(router.route(&SseEvent::new("posts", "{broken")), 1);

        assert_eq!(*received.lock().unwrap(), vec![json!({ "n": 1 }), json!({})]);
    }

    #[test]
    fn test_listener_may_mutate_registry() {
        let registry = SubscriptionRegistry::shared();
        let inner = Arc::clone(&registry);

        registry
            .lock()
            .unwrap()
            .add(
                "posts",
                Arc::new(move |_: &Value| {
                    inner.lock().unwrap().remove("posts");
                }),
                None,
            )
            .unwrap();

        let router = DispatchRouter::new(Arc::clone(&registry));
        assert_eq!(router.route(&SseEvent::new("posts", "{}")), 1);
        assert!(registry.lock().unwrap().is_empty());
    }
}
