//! Public handle of the realtime subscription manager.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::connection::ConnectionState;
use crate::coordinator::{Command, PendingSync, Responder};
use crate::error::RealtimeError;
use crate::registry::{Listener, SharedRegistry};
use crate::types::{ClientId, SubscriptionOptions};

/// Handle to a running realtime service.
///
/// Every mutating call updates the local subscription set immediately and
/// queues a sync with the server; the returned [`PendingSync`] resolves once
/// the server has accepted a subscription set that includes the change.
/// Dropping the handle closes the connection.
pub struct Realtime {
    registry: SharedRegistry,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    worker: Option<JoinHandle<()>>,
}

impl Realtime {
    pub(crate) fn new(
        registry: SharedRegistry,
        commands: mpsc::UnboundedSender<Command>,
        state: watch::Receiver<ConnectionState>,
        worker: JoinHandle<()>,
    ) -> Self {
        Self {
            registry,
            commands,
            state,
            worker: Some(worker),
        }
    }

    /// Register `listener` for `topic`.
    ///
    /// `Some(options)` replaces the topic's options for all of its
    /// listeners; an empty options value clears them. No request is sent
    /// when the topic was already subscribed with the same options and the
    /// server has accepted the current subscription set.
    pub fn subscribe<F>(
        &self,
        topic: &str,
        listener: F,
        options: Option<SubscriptionOptions>,
    ) -> PendingSync
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe_listener(topic, Arc::new(listener), options)
    }

    /// Like [`Realtime::subscribe`] with an already shared listener
    pub fn subscribe_listener(
        &self,
        topic: &str,
        listener: Listener,
        options: Option<SubscriptionOptions>,
    ) -> PendingSync {
        let outcome = match self.registry.lock() {
            Ok(mut registry) => registry
                .add(topic, listener, options)
                .map(|outcome| (outcome, registry.is_confirmed())),
            Err(_) => Err(RealtimeError::LockPoisoned),
        };

        match outcome {
            Err(e) => PendingSync::ready(Err(e)),
            Ok((outcome, confirmed))
                if !outcome.changes_desired_state() && confirmed && self.is_connected() =>
            {
                tracing::trace!("Added listener to {} without a sync", topic);
                PendingSync::ready(Ok(()))
            }
            Ok(_) => self.request(Command::Sync),
        }
    }

    /// Remove all listeners of `topic`, or of every topic when `None`.
    ///
    /// Removing a topic that is not subscribed does nothing and sends no
    /// request.
    pub fn unsubscribe(&self, topic: Option<&str>) -> PendingSync {
        let removed = match self.registry.lock() {
            Ok(mut registry) => match topic {
                Some(topic) => registry.remove(topic),
                None => !registry.remove_all().is_empty(),
            },
            Err(_) => return PendingSync::ready(Err(RealtimeError::LockPoisoned)),
        };

        if !removed {
            return PendingSync::ready(Ok(()));
        }
        self.request(Command::Sync)
    }

    /// Remove every topic starting with `prefix`
    pub fn unsubscribe_by_prefix(&self, prefix: &str) -> PendingSync {
        let removed = match self.registry.lock() {
            Ok(mut registry) => registry.remove_by_prefix(prefix),
            Err(_) => return PendingSync::ready(Err(RealtimeError::LockPoisoned)),
        };

        if removed.is_empty() {
            return PendingSync::ready(Ok(()));
        }
        tracing::debug!("Removed {} topics with prefix {}", removed.len(), prefix);
        self.request(Command::Sync)
    }

    /// Open the connection (if there is anything to subscribe to) and
    /// resubmit the current subscription set
    pub fn connect(&self) -> PendingSync {
        self.request(Command::Sync)
    }

    /// Close the connection without touching the subscription set.
    ///
    /// No reconnect follows; the next subscribe or [`Realtime::connect`]
    /// opens a new connection.
    pub fn disconnect(&self) -> PendingSync {
        self.request(Command::Disconnect)
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_open()
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.state.borrow().client_id().cloned()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Receiver for connection state transitions
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Subscribed topics, sorted
    pub fn topics(&self) -> Vec<String> {
        self.registry
            .lock()
            .map(|registry| registry.topics())
            .unwrap_or_default()
    }

    pub fn has_subscriptions(&self) -> bool {
        self.registry
            .lock()
            .map(|registry| !registry.is_empty())
            .unwrap_or(false)
    }

    /// Stop the background task and wait for it to finish
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                tracing::warn!("Realtime coordinator ended abnormally: {}", e);
            }
        }
    }

    fn request(&self, command: fn(Option<Responder>) -> Command) -> PendingSync {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(command(Some(tx))).is_err() {
            return PendingSync::ready(Err(RealtimeError::Shutdown));
        }
        PendingSync::waiting(rx)
    }
}

impl Drop for Realtime {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

impl std::fmt::Debug for Realtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Realtime")
            .field("state", &*self.state.borrow())
            .field("topics", &self.topics())
            .finish()
    }
}
