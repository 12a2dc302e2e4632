//! Builder for creating and configuring the realtime service.
//!
//! The `RealtimeBuilder` wires the subscription registry, the connection
//! manager and the sync coordinator together and starts the coordinator on
//! the current tokio runtime.
//!
//! # Example
//!
//! ```rust,ignore
//! use http_client::HttpClient;
//! use realtime::{RealtimeBuilder, RealtimeConfig};
//!
//! let http = HttpClient::new("http://127.0.0.1:8090")?;
//! let realtime = RealtimeBuilder::from_http_client(&http)
//!     .with_config(RealtimeConfig::default())
//!     .on_disconnect(|topics| println!("lost {} topics", topics.len()))
//!     .build()?;
//!
//! realtime.subscribe("posts", |event| println!("{}", event), None).await?;
//! ```

use std::sync::Arc;

use http_client::HttpClient;
use tokio::sync::mpsc;

use crate::config::{RealtimeConfig, REALTIME_PATH};
use crate::connection::ConnectionManager;
use crate::coordinator::{DisconnectHook, SyncCoordinator};
use crate::error::{RealtimeError, Result};
use crate::registry::SubscriptionRegistry;
use crate::router::DispatchRouter;
use crate::service::Realtime;
use crate::transport::{SseTransport, StreamTransport, SubscriptionTransport};

/// Builder for creating and configuring a [`Realtime`] service.
///
/// # Validation
///
/// The builder validates configuration when `build()` is called:
/// - Both transports must be set
/// - Connect timeout must be positive
/// - Reconnect intervals must be non-empty when reconnecting is enabled
/// - `build()` must run inside a tokio runtime
pub struct RealtimeBuilder {
    endpoint: String,
    config: RealtimeConfig,
    stream_transport: Option<Arc<dyn StreamTransport>>,
    subscription_transport: Option<Arc<dyn SubscriptionTransport>>,
    on_disconnect: Option<DisconnectHook>,
}

impl RealtimeBuilder {
    /// Create a builder for the stream at `endpoint` with default
    /// configuration and no transports.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            config: RealtimeConfig::default(),
            stream_transport: None,
            subscription_transport: None,
            on_disconnect: None,
        }
    }

    /// Create a builder that talks to the server behind `http`.
    ///
    /// The stream shares the client's connection pool and the subscription
    /// requests carry its auth token.
    pub fn from_http_client(http: &HttpClient) -> Self {
        Self::new(http.build_url(REALTIME_PATH))
            .with_stream_transport(Arc::new(SseTransport::from_http_client(http)))
            .with_subscription_transport(Arc::new(http.clone()))
    }

    pub fn with_config(mut self, config: RealtimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_stream_transport(mut self, transport: Arc<dyn StreamTransport>) -> Self {
        self.stream_transport = Some(transport);
        self
    }

    pub fn with_subscription_transport(
        mut self,
        transport: Arc<dyn SubscriptionTransport>,
    ) -> Self {
        self.subscription_transport = Some(transport);
        self
    }

    /// Called with the still-subscribed topics each time an open
    /// connection closes, before any reconnect
    pub fn on_disconnect<F>(mut self, hook: F) -> Self
    where
        F: Fn(&[String]) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(hook));
        self
    }

    /// Validate the configuration and start the service.
    ///
    /// # Errors
    ///
    /// Returns `RealtimeError::Configuration` if the configuration is
    /// invalid, a transport is missing, or no tokio runtime is running.
    pub fn build(self) -> Result<Realtime> {
        self.config.validate()?;

        let stream_transport = self.stream_transport.ok_or_else(|| {
            RealtimeError::Configuration("No stream transport configured".to_string())
        })?;
        let subscription_transport = self.subscription_transport.ok_or_else(|| {
            RealtimeError::Configuration("No subscription transport configured".to_string())
        })?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            RealtimeError::Configuration(
                "The realtime service must be built inside a tokio runtime".to_string(),
            )
        })?;

        let registry = SubscriptionRegistry::shared();
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let connection = ConnectionManager::new(
            self.endpoint,
            stream_transport,
            DispatchRouter::new(Arc::clone(&registry)),
            self.config.connect_timeout,
            closed_tx,
        );
        let state = connection.watch_state();

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let coordinator = SyncCoordinator::new(
            Arc::clone(&registry),
            connection,
            subscription_transport,
            self.config,
            command_rx,
            closed_rx,
            self.on_disconnect,
        );

        let worker = runtime.spawn(coordinator.run());
        tracing::debug!("Realtime service started");

        Ok(Realtime::new(registry, command_tx, state, worker))
    }
}
