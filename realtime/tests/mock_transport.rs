//! Mock transports for testing the realtime service without a server.
//!
//! `MockStreamTransport` hands out in-memory event streams that the test can
//! push events into or drop, and `MockSubscriptionTransport` records every
//! "set subscriptions" request. Both support configurable failure modes to
//! test error paths.

#![allow(dead_code)]

use async_trait::async_trait;
use http_client::ClientError;
use realtime::{
    EventStream, RealtimeError, SetSubscriptionsRequest, SseEvent, StreamTransport,
    SubscriptionTransport, CONNECT_EVENT,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

type EventSender = mpsc::UnboundedSender<realtime::Result<SseEvent>>;

#[derive(Default)]
struct StreamState {
    opens: usize,
    failing_opens: usize,
    silent: bool,
    open_delay: Option<Duration>,
    current: Option<EventSender>,
}

/// In-memory event stream source.
///
/// Every successful `open` yields a fresh stream whose first event is the
/// connect event with client id `client-N`, where N counts the opens.
#[derive(Clone, Default)]
pub struct MockStreamTransport {
    state: Arc<Mutex<StreamState>>,
}

impl MockStreamTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `open` calls so far, including failed ones
    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    /// Make the next `count` opens fail
    pub fn fail_next_opens(&self, count: usize) {
        self.state.lock().unwrap().failing_opens = count;
    }

    /// Open streams without ever sending the connect event
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().unwrap().silent = silent;
    }

    /// Delay every `open` before the stream is handed out
    pub fn set_open_delay(&self, delay: Duration) {
        self.state.lock().unwrap().open_delay = Some(delay);
    }

    /// Push an event into the current stream
    pub fn push(&self, event: SseEvent) -> bool {
        match &self.state.lock().unwrap().current {
            Some(sender) => sender.send(Ok(event)).is_ok(),
            None => false,
        }
    }

    /// Push a JSON payload under `topic`
    pub fn push_json(&self, topic: &str, payload: serde_json::Value) -> bool {
        self.push(SseEvent::new(topic, payload.to_string()))
    }

    /// End the current stream as if the server closed it
    pub fn drop_connection(&self) {
        self.state.lock().unwrap().current = None;
    }

    /// End the current stream with a read error
    pub fn fail_connection(&self, message: &str) {
        if let Some(sender) = self.state.lock().unwrap().current.take() {
            let _ = sender.send(Err(RealtimeError::Connection(message.to_string())));
        }
    }

    /// Whether the client still reads the current stream
    pub fn is_stream_open(&self) -> bool {
        match &self.state.lock().unwrap().current {
            Some(sender) => !sender.is_closed(),
            None => false,
        }
    }
}

#[async_trait]
impl StreamTransport for MockStreamTransport {
    async fn open(&self, _url: &str) -> realtime::Result<EventStream> {
        let delay = self.state.lock().unwrap().open_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.opens += 1;

        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(RealtimeError::Connection("mock open refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if !state.silent {
            let client_id = format!("client-{}", state.opens);
            let connect = SseEvent::new(CONNECT_EVENT, format!(r#"{{"clientId":"{}"}}"#, client_id))
                .with_id(client_id);
            let _ = tx.send(Ok(connect));
        }
        state.current = Some(tx);

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(stream))
    }
}

/// Records "set subscriptions" requests.
///
/// A gated transport holds every request until [`MockSubscriptionTransport::release`]
/// hands out a permit, which lets tests observe requests in flight.
pub struct MockSubscriptionTransport {
    requests: Mutex<Vec<SetSubscriptionsRequest>>,
    failures: Mutex<VecDeque<ClientError>>,
    gate: Option<Semaphore>,
}

impl MockSubscriptionTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            gate: None,
        })
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            gate: Some(Semaphore::new(0)),
        })
    }

    /// Let `count` held requests complete
    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    /// Fail the next request with `error`
    pub fn fail_next(&self, error: ClientError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn requests(&self) -> Vec<SetSubscriptionsRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<SetSubscriptionsRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl SubscriptionTransport for MockSubscriptionTransport {
    async fn set_subscriptions(
        &self,
        request: &SetSubscriptionsRequest,
    ) -> Result<(), ClientError> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(gate) = &self.gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(ClientError::aborted("/api/realtime")),
            }
        }

        match self.failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
