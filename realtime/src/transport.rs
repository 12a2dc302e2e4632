//! Transport seams of the realtime core
//!
//! The core only depends on two narrow interfaces: something that opens an
//! event stream ([`StreamTransport`]) and something that submits the full
//! subscription set ([`SubscriptionTransport`]). The default implementations
//! use reqwest for the stream and [`HttpClient`] for the request.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use http_client::{ClientError, HttpClient, SendOptions};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use serde::Serialize;

use crate::config::REALTIME_PATH;
use crate::error::{RealtimeError, Result};
use crate::sse::{parse_event_stream, SseEvent};

/// Stream of inbound events for one connection
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SseEvent>> + Send>>;

/// Opens the long-lived event stream
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open a stream to `url`
    ///
    /// Resolves once the server accepted the request; the connect event is
    /// the first item of the returned stream.
    async fn open(&self, url: &str) -> Result<EventStream>;
}

/// Body of the "set subscriptions" request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetSubscriptionsRequest {
    pub client_id: String,
    pub subscriptions: Vec<String>,
}

/// Submits the complete desired subscription set for a client id
#[async_trait]
pub trait SubscriptionTransport: Send + Sync {
    async fn set_subscriptions(
        &self,
        request: &SetSubscriptionsRequest,
    ) -> std::result::Result<(), ClientError>;
}

#[async_trait]
impl SubscriptionTransport for HttpClient {
    async fn set_subscriptions(
        &self,
        request: &SetSubscriptionsRequest,
    ) -> std::result::Result<(), ClientError> {
        let options = SendOptions::post().with_json(request)?;
        self.send(REALTIME_PATH, options).await.map(|_| ())
    }
}

/// Server-sent events over a plain reqwest GET
#[derive(Debug, Clone)]
pub struct SseTransport {
    client: reqwest::Client,
}

impl SseTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Share the connection pool of an existing [`HttpClient`]
    pub fn from_http_client(http: &HttpClient) -> Self {
        Self::new(http.inner().clone())
    }
}

impl Default for SseTransport {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl StreamTransport for SseTransport {
    async fn open(&self, url: &str) -> Result<EventStream> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| RealtimeError::Connection(format!("Failed to open {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RealtimeError::Connection(format!(
                "Failed to open {}: HTTP {}",
                url, status
            )));
        }

        tracing::debug!("Opened event stream {}", url);

        Ok(Box::pin(parse_event_stream(response.bytes_stream())))
    }
}
