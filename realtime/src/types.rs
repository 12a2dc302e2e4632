//! Core types for the realtime crate.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::{RealtimeError, Result};

/// Event name the server uses to confirm a new stream.
pub const CONNECT_EVENT: &str = "PB_CONNECT";

/// Server-assigned identifier of the current realtime stream.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct ClientId(pub String);

impl ClientId {
    /// Create a new client ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the client ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-topic options forwarded to the server with the subscription.
///
/// `query` carries list-style parameters such as `expand`, `fields` and
/// `filter`; `headers` are applied by the server when it evaluates access
/// rules for the events of this topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubscriptionOptions {
    pub query: BTreeMap<String, Value>,
    pub headers: BTreeMap<String, String>,
}

impl SubscriptionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Relations to expand in every event record
    pub fn with_expand(self, expand: impl Into<String>) -> Self {
        self.with_query("expand", expand.into())
    }

    /// Comma separated list of record fields to return
    pub fn with_fields(self, fields: impl Into<String>) -> Self {
        self.with_query("fields", fields.into())
    }

    /// Server-side filter expression events must match
    pub fn with_filter(self, filter: impl Into<String>) -> Self {
        self.with_query("filter", filter.into())
    }

    pub fn is_empty(&self) -> bool {
        self.query.is_empty() && self.headers.is_empty()
    }
}

/// Build the subscription string sent to the server for a topic.
///
/// Without options this is the topic itself. With non-empty options the
/// percent-encoded JSON `{"query":..,"headers":..}` is appended as an
/// `options` query parameter.
pub fn subscription_key(topic: &str, options: Option<&SubscriptionOptions>) -> Result<String> {
    let options = match options {
        Some(options) if !options.is_empty() => options,
        _ => return Ok(topic.to_string()),
    };

    let json = serde_json::to_string(options)
        .map_err(|e| RealtimeError::Usage(format!("Unserializable subscription options: {}", e)))?;
    let encoded: String = url::form_urlencoded::byte_serialize(json.as_bytes()).collect();
    let separator = if topic.contains('?') { '&' } else { '?' };

    Ok(format!("{}{}options={}", topic, separator, encoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_id() {
        let id = ClientId::new("abc123");
        assert_eq!(id.as_str(), "abc123");
        assert_eq!(id.to_string(), "abc123");
        assert_eq!(ClientId::from("abc123"), id);
    }

    #[test]
    fn test_subscription_key_without_options() {
        assert_eq!(subscription_key("posts", None).unwrap(), "posts");
        assert_eq!(
            subscription_key("posts/abc", Some(&SubscriptionOptions::new())).unwrap(),
            "posts/abc"
        );
    }

    #[test]
    fn test_subscription_key_with_options() {
        let options = SubscriptionOptions::new().with_expand("author");
        let key = subscription_key("posts", Some(&options)).unwrap();

        let (topic, encoded) = key.split_once("?options=").unwrap();
        assert_eq!(topic, "posts");

        let decoded: String = url::form_urlencoded::parse(format!("o={}", encoded).as_bytes())
            .next()
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let value: Value = serde_json::from_str(&decoded).unwrap();
        assert_eq!(value, json!({ "query": { "expand": "author" }, "headers": {} }));
    }

    #[test]
    fn test_subscription_key_appends_to_existing_query() {
        let options = SubscriptionOptions::new().with_header("X-Token", "1");
        let key = subscription_key("posts?x=1", Some(&options)).unwrap();
        assert!(key.starts_with("posts?x=1&options="));
    }

    #[test]
    fn test_options_builders() {
        let options = SubscriptionOptions::new()
            .with_filter("status = 'published'")
            .with_fields("id,title")
            .with_query("page", 2);

        assert_eq!(options.query["filter"], json!("status = 'published'"));
        assert_eq!(options.query["fields"], json!("id,title"));
        assert_eq!(options.query["page"], json!(2));
        assert!(options.headers.is_empty());
        assert!(!options.is_empty());
    }
}
