//! Background task that keeps the server's subscription set in step with the
//! local registry.
//!
//! The coordinator exclusively owns the [`ConnectionManager`]. Public handles
//! only mutate the registry and send a [`Command`]; the coordinator then
//! snapshots the registry and submits the whole set. Requests that pile up
//! while one is being handled are answered together by the next completed
//! submission, and a newer request supersedes one still in flight, so the
//! server always ends up with the latest snapshot.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::config::RealtimeConfig;
use crate::connection::{ConnectionManager, StreamClosed};
use crate::error::{RealtimeError, Result};
use crate::registry::SharedRegistry;
use crate::transport::{SetSubscriptionsRequest, SubscriptionTransport};

/// Called with the still-desired topics whenever an open connection closes
pub type DisconnectHook = Arc<dyn Fn(&[String]) + Send + Sync>;

pub(crate) type Responder = oneshot::Sender<Result<()>>;

/// Commands sent from [`crate::Realtime`] handles to the coordinator
#[derive(Debug)]
pub(crate) enum Command {
    /// Bring the server in line with the registry
    Sync(Option<Responder>),
    /// Close the connection without reconnecting
    Disconnect(Option<Responder>),
    /// Close the connection and stop the task
    Shutdown,
}

/// Completion of a subscribe, unsubscribe, connect or disconnect call.
///
/// The operation has already been queued when this is returned; awaiting
/// it is optional and only reports the outcome.
#[must_use = "the outcome of the sync is only reported when awaited"]
#[derive(Debug)]
pub struct PendingSync {
    inner: PendingInner,
}

#[derive(Debug)]
enum PendingInner {
    Ready(Option<Result<()>>),
    Waiting(oneshot::Receiver<Result<()>>),
}

impl PendingSync {
    pub(crate) fn ready(result: Result<()>) -> Self {
        Self {
            inner: PendingInner::Ready(Some(result)),
        }
    }

    pub(crate) fn waiting(receiver: oneshot::Receiver<Result<()>>) -> Self {
        Self {
            inner: PendingInner::Waiting(receiver),
        }
    }
}

impl Future for PendingSync {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.inner {
            PendingInner::Ready(result) => Poll::Ready(result.take().unwrap_or(Ok(()))),
            PendingInner::Waiting(receiver) => Pin::new(receiver)
                .poll(cx)
                .map(|outcome| outcome.unwrap_or(Err(RealtimeError::Shutdown))),
        }
    }
}

/// How a future driven alongside the command queue ended
enum Driven<T> {
    Done(T),
    /// A newer sync request arrived
    Superseded,
    /// A disconnect or shutdown arrived; `None` means every handle is gone
    Interrupted(Option<Command>),
}

pub(crate) struct SyncCoordinator {
    registry: SharedRegistry,
    connection: ConnectionManager,
    transport: Arc<dyn SubscriptionTransport>,
    config: RealtimeConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    closed_rx: mpsc::UnboundedReceiver<StreamClosed>,
    on_disconnect: Option<DisconnectHook>,
    waiters: Vec<Responder>,
    sync_requested: bool,
    reconnect_attempts: usize,
    reconnect_at: Option<Instant>,
    shutdown: bool,
}

impl SyncCoordinator {
    pub(crate) fn new(
        registry: SharedRegistry,
        connection: ConnectionManager,
        transport: Arc<dyn SubscriptionTransport>,
        config: RealtimeConfig,
        commands: mpsc::UnboundedReceiver<Command>,
        closed_rx: mpsc::UnboundedReceiver<StreamClosed>,
        on_disconnect: Option<DisconnectHook>,
    ) -> Self {
        Self {
            registry,
            connection,
            transport,
            config,
            commands,
            closed_rx,
            on_disconnect,
            waiters: Vec::new(),
            sync_requested: false,
            reconnect_attempts: 0,
            reconnect_at: None,
            shutdown: false,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::debug!("Realtime coordinator started for {}", self.connection.url());

        while !self.shutdown {
            tokio::select! {
                command = self.commands.recv() => self.absorb(command),
                Some(closed) = self.closed_rx.recv() => self.handle_stream_closed(closed),
                _ = sleep_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    tracing::info!("Reconnecting (attempt {})", self.reconnect_attempts);
                    self.sync_requested = true;
                }
            }

            if self.sync_requested && !self.shutdown {
                self.reconcile().await;
            }
        }

        self.connection.disconnect();
        self.respond_all(Err(RealtimeError::Shutdown));
        tracing::debug!("Realtime coordinator stopped");
    }

    fn absorb(&mut self, command: Option<Command>) {
        match command {
            Some(Command::Sync(responder)) => {
                self.waiters.extend(responder);
                self.sync_requested = true;
            }
            Some(Command::Disconnect(responder)) => {
                self.sync_requested = false;
                self.reconnect_at = None;
                self.reconnect_attempts = 0;
                self.close_connection("closed by client");
                self.respond_all(Err(RealtimeError::Connection(
                    "Connection closed by client".to_string(),
                )));
                if let Some(responder) = responder {
                    let _ = responder.send(Ok(()));
                }
            }
            Some(Command::Shutdown) | None => {
                tracing::debug!("Realtime coordinator shutting down");
                self.shutdown = true;
            }
        }
    }

    /// Submit registry snapshots until no newer request is pending
    async fn reconcile(&mut self) {
        loop {
            // Coalesce everything queued behind the request being handled
            while let Ok(command) = self.commands.try_recv() {
                self.absorb(Some(command));
            }
            if !self.sync_requested || self.shutdown {
                return;
            }
            self.sync_requested = false;

            match self.snapshot() {
                None => {
                    self.respond_all(Err(RealtimeError::LockPoisoned));
                    return;
                }
                Some((_, subscriptions)) if subscriptions.is_empty() => {
                    self.close_idle();
                    continue;
                }
                Some(_) => {}
            }

            let reconnecting = self.reconnect_attempts > 0;
            let connected = drive(
                self.connection.ensure_connected(),
                &mut self.commands,
                &mut self.waiters,
                &mut self.sync_requested,
                false,
            )
            .await;

            let client_id = match connected {
                Driven::Done(Ok(client_id)) => client_id,
                Driven::Done(Err(e)) => {
                    tracing::warn!("Failed to open realtime connection: {}", e);
                    // Requests absorbed while connecting share the failure
                    self.sync_requested = false;
                    self.respond_all(Err(e.clone()));
                    if reconnecting {
                        self.schedule_reconnect(Some(e));
                    }
                    continue;
                }
                Driven::Superseded => continue,
                Driven::Interrupted(command) => {
                    self.connection.disconnect();
                    self.forget_confirmed();
                    self.absorb(command);
                    continue;
                }
            };

            self.reconnect_at = None;
            self.reconnect_attempts = 0;

            // Read the registry only now so changes made while connecting are
            // part of this submission
            self.sync_requested = false;
            let Some((revision, subscriptions)) = self.snapshot() else {
                self.respond_all(Err(RealtimeError::LockPoisoned));
                return;
            };
            if subscriptions.is_empty() {
                self.close_idle();
                continue;
            }

            let request = SetSubscriptionsRequest {
                client_id: client_id.to_string(),
                subscriptions,
            };
            let transport = Arc::clone(&self.transport);
            let sent = drive(
                async move {
                    let result = transport.set_subscriptions(&request).await;
                    (request, result)
                },
                &mut self.commands,
                &mut self.waiters,
                &mut self.sync_requested,
                true,
            )
            .await;

            let (request, result) = match sent {
                Driven::Done(done) => done,
                Driven::Superseded => {
                    tracing::debug!("Subscription request superseded by a newer one");
                    continue;
                }
                Driven::Interrupted(command) => {
                    self.absorb(command);
                    continue;
                }
            };

            // The stream may have been replaced while the request was in flight
            while let Ok(closed) = self.closed_rx.try_recv() {
                self.handle_stream_closed(closed);
            }
            if self.connection.client_id().as_ref() != Some(&client_id) {
                tracing::debug!("Discarding subscription response for stale client {}", client_id);
                continue;
            }

            match result {
                Ok(()) => {
                    tracing::debug!(
                        "Submitted {} subscriptions for client {} (revision {})",
                        request.subscriptions.len(),
                        client_id,
                        revision
                    );
                    if let Ok(mut registry) = self.registry.lock() {
                        registry.mark_confirmed(revision);
                    }
                    self.respond_all(Ok(()));
                }
                Err(e) if e.is_abort() => {
                    tracing::debug!("Subscription request aborted: {}", e);
                    self.sync_requested = true;
                }
                Err(e) => {
                    tracing::warn!("Failed to submit subscriptions: {}", e);
                    self.respond_all(Err(RealtimeError::Reconciliation(e)));
                }
            }
        }
    }

    fn handle_stream_closed(&mut self, closed: StreamClosed) {
        if !self.connection.handle_closed(&closed) {
            tracing::debug!("Ignoring close of stale connection epoch {}", closed.epoch);
            return;
        }

        self.forget_confirmed();
        match &closed.error {
            Some(e) => tracing::warn!("Realtime connection dropped: {}", e),
            None => tracing::warn!("Realtime connection closed by server"),
        }
        self.notify_disconnect();

        if self.has_subscriptions() {
            self.schedule_reconnect(closed.error);
        } else {
            self.respond_all(Ok(()));
        }
    }

    fn schedule_reconnect(&mut self, error: Option<RealtimeError>) {
        if self.config.can_reconnect(self.reconnect_attempts) {
            let delay = self.config.reconnect_delay(self.reconnect_attempts);
            self.reconnect_attempts += 1;
            self.reconnect_at = Some(Instant::now() + delay);
            tracing::debug!(
                "Scheduled reconnect attempt {} in {:?}",
                self.reconnect_attempts,
                delay
            );
            return;
        }

        if self.config.auto_reconnect {
            tracing::error!(
                "Giving up on the realtime connection after {} reconnect attempts",
                self.reconnect_attempts
            );
        }
        self.reconnect_at = None;
        self.reconnect_attempts = 0;
        let error = error
            .unwrap_or_else(|| RealtimeError::Connection("Connection closed by server".to_string()));
        self.respond_all(Err(error));
    }

    /// Nothing is subscribed: close instead of submitting an empty set
    fn close_idle(&mut self) {
        self.reconnect_at = None;
        self.reconnect_attempts = 0;
        self.close_connection("no active subscriptions");
        self.respond_all(Ok(()));
    }

    fn close_connection(&mut self, reason: &str) {
        self.forget_confirmed();
        if self.connection.disconnect() {
            tracing::info!("Realtime connection closed: {}", reason);
            self.notify_disconnect();
        }
    }

    fn notify_disconnect(&self) {
        let Some(hook) = &self.on_disconnect else {
            return;
        };

        let topics = match self.registry.lock() {
            Ok(registry) => registry.topics(),
            Err(_) => Vec::new(),
        };

        let outcome =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook(topics.as_slice())));
        if outcome.is_err() {
            tracing::error!("Disconnect hook panicked");
        }
    }

    /// Current revision and subscription strings
    fn snapshot(&self) -> Option<(u64, Vec<String>)> {
        self.registry
            .lock()
            .ok()
            .map(|registry| (registry.revision(), registry.subscriptions()))
    }

    fn forget_confirmed(&self) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.clear_confirmed();
        }
    }

    fn has_subscriptions(&self) -> bool {
        self.registry
            .lock()
            .map(|registry| !registry.is_empty())
            .unwrap_or(false)
    }

    fn respond_all(&mut self, result: Result<()>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }
}

/// Run `future` while watching the command queue.
///
/// Sync requests are recorded as they arrive; with `supersede_on_sync` the
/// first one also abandons `future`. A disconnect, shutdown or closed queue
/// always abandons it.
async fn drive<F: Future>(
    future: F,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    waiters: &mut Vec<Responder>,
    sync_requested: &mut bool,
    supersede_on_sync: bool,
) -> Driven<F::Output> {
    tokio::pin!(future);

    loop {
        tokio::select! {
            output = &mut future => return Driven::Done(output),
            command = commands.recv() => match command {
                Some(Command::Sync(responder)) => {
                    waiters.extend(responder);
                    *sync_requested = true;
                    if supersede_on_sync {
                        return Driven::Superseded;
                    }
                }
                other => return Driven::Interrupted(other),
            },
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
