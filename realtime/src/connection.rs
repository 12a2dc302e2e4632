//! Lifecycle of the single realtime event stream.
//!
//! `ConnectionManager` owns at most one open stream. Opening waits for the
//! server's connect event, which carries the client id every subscription
//! request must reference. A background reader forwards all later events to
//! the [`DispatchRouter`] and reports the end of the stream on a channel
//! tagged with the connection's epoch, so that the owner can tell a drop of
//! the current stream from a late report about an earlier one.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{RealtimeError, Result};
use crate::router::DispatchRouter;
use crate::sse::SseEvent;
use crate::transport::{EventStream, StreamTransport};
use crate::types::{ClientId, CONNECT_EVENT};

/// Observable state of the realtime connection
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    Open { client_id: ClientId },
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open { .. })
    }

    pub fn client_id(&self) -> Option<&ClientId> {
        match self {
            ConnectionState::Open { client_id } => Some(client_id),
            _ => None,
        }
    }
}

/// Reported by the reader task when its stream ends
#[derive(Debug, Clone)]
pub struct StreamClosed {
    /// Epoch of the connection the reader belonged to
    pub epoch: u64,
    /// Read error, or `None` when the server ended the stream
    pub error: Option<RealtimeError>,
}

/// Opens, tracks and closes the event stream
pub struct ConnectionManager {
    url: String,
    transport: Arc<dyn StreamTransport>,
    router: DispatchRouter,
    connect_timeout: Duration,
    state: watch::Sender<ConnectionState>,
    closed_tx: mpsc::UnboundedSender<StreamClosed>,
    reader: Option<JoinHandle<()>>,
    epoch: u64,
}

impl ConnectionManager {
    pub fn new(
        url: impl Into<String>,
        transport: Arc<dyn StreamTransport>,
        router: DispatchRouter,
        connect_timeout: Duration,
        closed_tx: mpsc::UnboundedSender<StreamClosed>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        Self {
            url: url.into(),
            transport,
            router,
            connect_timeout,
            state,
            closed_tx,
            reader: None,
            epoch: 0,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state transition
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().is_open()
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.state.borrow().client_id().cloned()
    }

    /// Epoch of the most recently opened connection
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Return the current client id, opening a stream first when closed.
    ///
    /// Waits for the connect event for at most the configured connect
    /// timeout. The connect event is dispatched to its listeners like any
    /// other event. On failure the state returns to `Closed`.
    pub async fn ensure_connected(&mut self) -> Result<ClientId> {
        if let Some(client_id) = self.client_id() {
            return Ok(client_id);
        }

        self.set_state(ConnectionState::Connecting);
        tracing::debug!("Opening realtime connection to {}", self.url);

        let opened = tokio::time::timeout(
            self.connect_timeout,
            open_and_confirm(self.transport.as_ref(), &self.url),
        )
        .await;

        let (client_id, stream, connect_event) = match opened {
            Ok(Ok(opened)) => opened,
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Closed);
                return Err(e);
            }
            Err(_) => {
                self.set_state(ConnectionState::Closed);
                return Err(RealtimeError::ConnectTimeout(self.connect_timeout));
            }
        };

        self.epoch += 1;
        self.set_state(ConnectionState::Open {
            client_id: client_id.clone(),
        });
        tracing::info!("Realtime connection established (client {})", client_id);

        self.router.route(&connect_event);
        self.reader = Some(spawn_reader(
            stream,
            self.router.clone(),
            self.epoch,
            self.closed_tx.clone(),
        ));

        Ok(client_id)
    }

    /// Close the current stream, if any.
    ///
    /// Returns whether an open connection was closed. Safe to call in any
    /// state; the reader of a closed stream never reports back.
    pub fn disconnect(&mut self) -> bool {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        let was_open = self.is_open();
        self.set_state(ConnectionState::Closed);
        was_open
    }

    /// Apply a reader's end-of-stream report.
    ///
    /// Returns `true` when the report is about the current open connection,
    /// which is then marked closed. Reports about earlier connections are
    /// ignored.
    pub fn handle_closed(&mut self, closed: &StreamClosed) -> bool {
        if closed.epoch != self.epoch || !self.is_open() {
            return false;
        }

        self.reader = None;
        self.set_state(ConnectionState::Closed);
        true
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        tracing::trace!("Connection state {:?} -> {:?}", previous, *self.state.borrow());
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Open a stream and read until the connect event arrives
async fn open_and_confirm(
    transport: &dyn StreamTransport,
    url: &str,
) -> Result<(ClientId, EventStream, SseEvent)> {
    let mut stream = transport.open(url).await?;

    while let Some(item) = stream.next().await {
        let event = item?;

        if event.event != CONNECT_EVENT {
            tracing::debug!("Ignoring {} event received before {}", event.event, CONNECT_EVENT);
            continue;
        }

        let client_id = connect_client_id(&event).ok_or_else(|| {
            RealtimeError::Connection(format!("{} event carried no client id", CONNECT_EVENT))
        })?;

        return Ok((client_id, stream, event));
    }

    Err(RealtimeError::Connection(format!(
        "Event stream ended before {}",
        CONNECT_EVENT
    )))
}

/// Client id of a connect event: its event id, else `clientId` in the payload
fn connect_client_id(event: &SseEvent) -> Option<ClientId> {
    if let Some(id) = event.id.as_deref().filter(|id| !id.is_empty()) {
        return Some(ClientId::new(id));
    }

    serde_json::from_str::<Value>(&event.data)
        .ok()?
        .get("clientId")?
        .as_str()
        .filter(|id| !id.is_empty())
        .map(ClientId::new)
}

fn spawn_reader(
    mut stream: EventStream,
    router: DispatchRouter,
    epoch: u64,
    closed_tx: mpsc::UnboundedSender<StreamClosed>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let error = loop {
            match stream.next().await {
                Some(Ok(event)) => {
                    router.route(&event);
                }
                Some(Err(e)) => break Some(e),
                None => break None,
            }
        };

        tracing::debug!("Reader for connection epoch {} finished", epoch);
        let _ = closed_tx.send(StreamClosed { epoch, error });
    })
}
