//! Topic registration with per-topic listeners and options
//!
//! The registry is the client's desired subscription state. It maps each
//! topic key to its listeners (in registration order) and the options sent to
//! the server for that topic. The server-side subscription set converges
//! towards this state; nothing received from the server ever writes to it.
//! The only server-derived value kept here is the revision the server last
//! accepted.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::{RealtimeError, Result};
use crate::types::{subscription_key, SubscriptionOptions};

/// Callback invoked with each decoded message of a topic
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Registry handle shared between the public service, the coordinator and
/// the dispatch router
pub type SharedRegistry = Arc<Mutex<SubscriptionRegistry>>;

struct TopicEntry {
    listeners: Vec<Listener>,
    options: Option<SubscriptionOptions>,
    /// Topic plus encoded options, as sent to and echoed by the server
    subscription: String,
}

/// Result of [`SubscriptionRegistry::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    /// The topic had no listeners before this call
    pub is_first_listener: bool,
    /// The options stored for an existing topic were replaced
    pub options_changed: bool,
}

impl AddOutcome {
    /// Whether the server needs a new subscription set
    pub fn changes_desired_state(&self) -> bool {
        self.is_first_listener || self.options_changed
    }
}

/// Desired topic set with listeners and options
///
/// `revision` increases every time the set of topics or any topic's options
/// change; adding another listener to an existing topic does not change it.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: BTreeMap<String, TopicEntry>,
    revision: u64,
    confirmed: Option<u64>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry wrapped for sharing across tasks
    pub fn shared() -> SharedRegistry {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Register `listener` under `topic`
    ///
    /// When `options` is `Some`, it replaces the options stored for the topic
    /// (an empty value clears them). Existing listeners are kept either way.
    pub fn add(
        &mut self,
        topic: &str,
        listener: Listener,
        options: Option<SubscriptionOptions>,
    ) -> Result<AddOutcome> {
        if topic.is_empty() {
            return Err(RealtimeError::Usage("topic must be set".to_string()));
        }

        let outcome = match self.entries.get_mut(topic) {
            Some(entry) => {
                let mut options_changed = false;
                if let Some(new_options) = options {
                    let new_options = Some(new_options).filter(|o| !o.is_empty());
                    if entry.options != new_options {
                        entry.subscription = subscription_key(topic, new_options.as_ref())?;
                        entry.options = new_options;
                        options_changed = true;
                    }
                }
                entry.listeners.push(listener);

                AddOutcome {
                    is_first_listener: false,
                    options_changed,
                }
            }
            None => {
                let options = options.filter(|o| !o.is_empty());
                let subscription = subscription_key(topic, options.as_ref())?;
                self.entries.insert(
                    topic.to_string(),
                    TopicEntry {
                        listeners: vec![listener],
                        options,
                        subscription,
                    },
                );

                AddOutcome {
                    is_first_listener: true,
                    options_changed: false,
                }
            }
        };

        if outcome.changes_desired_state() {
            self.revision += 1;
        }

        tracing::debug!(
            "Registered listener for {} ({} total, first: {})",
            topic,
            self.listener_count(topic),
            outcome.is_first_listener
        );

        Ok(outcome)
    }

    /// Remove every listener and the options of `topic`
    ///
    /// Returns whether the topic was registered.
    pub fn remove(&mut self, topic: &str) -> bool {
        let existed = self.entries.remove(topic).is_some();
        if existed {
            self.revision += 1;
        }
        existed
    }

    /// Remove every topic starting with `prefix`, returning the removed topics
    pub fn remove_by_prefix(&mut self, prefix: &str) -> Vec<String> {
        let removed: Vec<String> = self
            .entries
            .keys()
            .filter(|topic| topic.starts_with(prefix))
            .cloned()
            .collect();

        for topic in &removed {
            self.entries.remove(topic);
        }
        if !removed.is_empty() {
            self.revision += 1;
        }
        removed
    }

    /// Clear the registry, returning the removed topics
    pub fn remove_all(&mut self) -> Vec<String> {
        let removed: Vec<String> = std::mem::take(&mut self.entries).into_keys().collect();
        if !removed.is_empty() {
            self.revision += 1;
        }
        removed
    }

    /// Current topics with their options
    pub fn keys(&self) -> Vec<(String, Option<SubscriptionOptions>)> {
        self.entries
            .iter()
            .map(|(topic, entry)| (topic.clone(), entry.options.clone()))
            .collect()
    }

    pub fn topics(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Subscription strings for the "set subscriptions" request, sorted by topic
    pub fn subscriptions(&self) -> Vec<String> {
        self.entries
            .values()
            .map(|entry| entry.subscription.clone())
            .collect()
    }

    /// Listeners for an inbound event name
    ///
    /// The server names events after the subscription string, so both the
    /// bare topic and the topic with encoded options resolve to the entry.
    pub fn listeners_for(&self, event_name: &str) -> Vec<Listener> {
        self.entries
            .get(event_name)
            .or_else(|| {
                self.entries
                    .values()
                    .find(|entry| entry.subscription == event_name)
            })
            .map(|entry| entry.listeners.clone())
            .unwrap_or_default()
    }

    /// Invoke every listener of `event_name` with `payload`
    ///
    /// Returns how many listeners completed without panicking.
    pub fn dispatch(&self, event_name: &str, payload: &Value) -> usize {
        invoke_listeners(event_name, &self.listeners_for(event_name), payload)
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        self.entries.get(topic).map_or(0, |entry| entry.listeners.len())
    }

    pub fn options(&self, topic: &str) -> Option<SubscriptionOptions> {
        self.entries.get(topic).and_then(|entry| entry.options.clone())
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.entries.contains_key(topic)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Record that the server accepted the set submitted at `revision`
    pub fn mark_confirmed(&mut self, revision: u64) {
        self.confirmed = Some(revision);
    }

    /// Forget the accepted revision, e.g. when the connection that held it closed
    pub fn clear_confirmed(&mut self) {
        self.confirmed = None;
    }

    /// Whether the server holds exactly the current desired state
    pub fn is_confirmed(&self) -> bool {
        self.confirmed == Some(self.revision)
    }
}

/// Call each listener in order, isolating panics
///
/// A panicking listener is logged and skipped; the remaining listeners still
/// run. Returns how many listeners completed.
pub fn invoke_listeners(topic: &str, listeners: &[Listener], payload: &Value) -> usize {
    let mut completed = 0;

    for (index, listener) in listeners.iter().enumerate() {
        match catch_unwind(AssertUnwindSafe(|| listener(payload))) {
            Ok(()) => completed += 1,
            Err(_) => {
                tracing::error!("Listener #{} for topic {} panicked", index, topic);
            }
        }
    }

    completed
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn noop() -> Listener {
        Arc::new(|_: &Value| {})
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> Listener {
        let log = Arc::clone(log);
        let tag = tag.to_string();
        Arc::new(move |payload: &Value| {
            log.lock().unwrap().push(format!("{}:{}", tag, payload));
        })
    }

    #[test]
    fn test_add_reports_first_listener() {
        let mut registry = SubscriptionRegistry::new();

        let first = registry.add("posts", noop(), None).unwrap();
        assert!(first.is_first_listener);
        assert!(first.changes_desired_state());

        let second = registry.add("posts", noop(), None).unwrap();
        assert!(!second.is_first_listener);
        assert!(!second.changes_desired_state());

        assert_eq!(registry.listener_count("posts"), 2);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.revision(), 1);
    }

    #[test]
    fn test_add_rejects_empty_topic() {
        let mut registry = SubscriptionRegistry::new();
        let result = registry.add("", noop(), None);
        assert!(matches!(result, Err(RealtimeError::Usage(_))));
        assert!(registry.is_empty());
        assert_eq!(registry.revision(), 0);
    }

    #[test]
    fn test_options_replace_without_dropping_listeners() {
        let mut registry = SubscriptionRegistry::new();
        let expand = SubscriptionOptions::new().with_expand("author");

        registry.add("posts", noop(), Some(expand.clone())).unwrap();
        assert_eq!(registry.options("posts"), Some(expand.clone()));

        // Same options again: no state change
        let same = registry.add("posts", noop(), Some(expand)).unwrap();
        assert!(!same.changes_desired_state());

        // Omitted options keep the stored ones
        let omitted = registry.add("posts", noop(), None).unwrap();
        assert!(!omitted.options_changed);
        assert!(registry.options("posts").is_some());

        let filter = SubscriptionOptions::new().with_filter("published = true");
        let replaced = registry.add("posts", noop(), Some(filter.clone())).unwrap();
        assert!(replaced.options_changed);
        assert_eq!(registry.options("posts"), Some(filter));
        assert_eq!(registry.listener_count("posts"), 4);

        // An empty value clears them
        let cleared = registry.add("posts", noop(), Some(SubscriptionOptions::new())).unwrap();
        assert!(cleared.options_changed);
        assert!(registry.options("posts").is_none());
        assert_eq!(registry.subscriptions(), vec!["posts".to_string()]);
    }

    #[test]
    fn test_remove_and_remove_all() {
        let mut registry = SubscriptionRegistry::new();
        registry.add("posts", noop(), None).unwrap();
        registry.add("posts", noop(), None).unwrap();
        registry.add("users/abc", noop(), None).unwrap();

        assert!(registry.remove("posts"));
        assert!(!registry.contains("posts"));
        assert!(!registry.remove("posts"));

        let revision = registry.revision();
        assert!(!registry.remove("missing"));
        assert_eq!(registry.revision(), revision);

        assert_eq!(registry.remove_all(), vec!["users/abc".to_string()]);
        assert!(registry.is_empty());
        assert!(registry.remove_all().is_empty());
    }

    #[test]
    fn test_remove_by_prefix() {
        let mut registry = SubscriptionRegistry::new();
        registry.add("posts", noop(), None).unwrap();
        registry.add("posts/abc", noop(), None).unwrap();
        registry.add("users", noop(), None).unwrap();

        let removed = registry.remove_by_prefix("posts");
        assert_eq!(removed, vec!["posts".to_string(), "posts/abc".to_string()]);
        assert_eq!(registry.topics(), vec!["users".to_string()]);
    }

    #[test]
    fn test_confirmation_tracks_revision() {
        let mut registry = SubscriptionRegistry::new();
        registry.add("posts", noop(), None).unwrap();
        assert!(!registry.is_confirmed());

        registry.mark_confirmed(registry.revision());
        assert!(registry.is_confirmed());

        // Another listener leaves the desired state unchanged
        registry.add("posts", noop(), None).unwrap();
        assert!(registry.is_confirmed());

        let submitted = registry.revision();
        registry.add("users", noop(), None).unwrap();
        registry.mark_confirmed(submitted);
        assert!(!registry.is_confirmed());

        registry.mark_confirmed(registry.revision());
        registry.clear_confirmed();
        assert!(!registry.is_confirmed());
    }

    #[test]
    fn test_subscriptions_are_sorted_and_encoded() {
        let mut registry = SubscriptionRegistry::new();
        registry.add("users", noop(), None).unwrap();
        registry
            .add("posts", noop(), Some(SubscriptionOptions::new().with_expand("author")))
            .unwrap();

        let subscriptions = registry.subscriptions();
        assert_eq!(subscriptions.len(), 2);
        assert!(subscriptions[0].starts_with("posts?options="));
        assert_eq!(subscriptions[1], "users");
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SubscriptionRegistry::new();
        registry.add("posts", recorder(&log, "first"), None).unwrap();
        registry.add("posts", recorder(&log, "second"), None).unwrap();
        registry.add("users", recorder(&log, "other"), None).unwrap();

        let delivered = registry.dispatch("posts", &json!({ "action": "create" }));
        assert_eq!(delivered, 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                r#"first:{"action":"create"}"#.to_string(),
                r#"second:{"action":"create"}"#.to_string(),
            ]
        );

        assert_eq!(registry.dispatch("unknown", &json!({})), 0);
    }

    #[test]
    fn test_dispatch_matches_subscription_string() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SubscriptionRegistry::new();
        let options = SubscriptionOptions::new().with_fields("id");
        registry.add("posts", recorder(&log, "l"), Some(options)).unwrap();

        let event_name = registry.subscriptions().remove(0);
        assert_eq!(registry.dispatch(&event_name, &json!(1)), 1);
        assert_eq!(registry.dispatch("posts", &json!(2)), 1);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SubscriptionRegistry::new();
        registry
            .add("posts", Arc::new(|_: &Value| panic!("listener failure")), None)
            .unwrap();
        registry.add("posts", recorder(&log, "after"), None).unwrap();

        let delivered = registry.dispatch("posts", &json!({}));
        assert_eq!(delivered, 1);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u8),
        Remove(u8),
        RemovePrefix(u8),
        RemoveAll,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0u8..6).prop_map(Op::Add),
            2 => (0u8..6).prop_map(Op::Remove),
            1 => (0u8..6).prop_map(Op::RemovePrefix),
            1 => Just(Op::RemoveAll),
        ]
    }

    proptest! {
        #[test]
        fn prop_registry_matches_model(ops in proptest::collection::vec(op_strategy(), 0..64)) {
            let mut registry = SubscriptionRegistry::new();
            let mut model: BTreeSet<String> = BTreeSet::new();
            let mut last_revision = registry.revision();

            for op in ops {
                let before = model.clone();
                match op {
                    Op::Add(n) => {
                        let topic = format!("topic{}", n);
                        let outcome = registry.add(&topic, noop(), None).unwrap();
                        prop_assert_eq!(outcome.is_first_listener, !model.contains(&topic));
                        model.insert(topic);
                    }
                    Op::Remove(n) => {
                        let topic = format!("topic{}", n);
                        prop_assert_eq!(registry.remove(&topic), model.remove(&topic));
                    }
                    Op::RemovePrefix(n) => {
                        let prefix = format!("topic{}", n);
                        registry.remove_by_prefix(&prefix);
                        model.retain(|t| !t.starts_with(&prefix));
                    }
                    Op::RemoveAll => {
                        registry.remove_all();
                        model.clear();
                    }
                }

                // Every present topic keeps at least one listener
                for topic in registry.topics() {
                    prop_assert!(registry.listener_count(&topic) >= 1);
                }
                prop_assert_eq!(registry.topics(), model.iter().cloned().collect::<Vec<_>>());

                // The revision moves exactly when the topic set moves
                let revision = registry.revision();
                prop_assert_eq!(revision != last_revision, before != model);
                last_revision = revision;
            }
        }
    }
}
