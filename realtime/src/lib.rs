//! # realtime
//!
//! Client-side manager for a server-sent-events subscription channel.
//!
//! One long-lived event stream is shared by any number of topic
//! subscriptions. The server assigns a client id when the stream opens, and
//! the full set of subscribed topics is submitted for that id with a separate
//! request whenever it changes. The crate is split into four parts:
//!
//! - [`SubscriptionRegistry`]: topic → listeners and options, the single
//!   source of truth for what the client wants
//! - [`ConnectionManager`]: opens the stream, waits for the client id and
//!   reports when the stream ends
//! - the sync coordinator: a background task that submits registry
//!   snapshots, coalesces bursts of changes and reconnects after drops
//! - [`DispatchRouter`]: decodes inbound events and invokes the listeners of
//!   their topic
//!
//! ## Usage
//!
//! ```rust,ignore
//! use http_client::HttpClient;
//! use realtime::{RealtimeBuilder, SubscriptionOptions};
//!
//! let http = HttpClient::new("http://127.0.0.1:8090")?;
//! let realtime = RealtimeBuilder::from_http_client(&http).build()?;
//!
//! realtime
//!     .subscribe(
//!         "posts",
//!         |event| println!("post changed: {}", event),
//!         Some(SubscriptionOptions::new().with_expand("author")),
//!     )
//!     .await?;
//!
//! realtime.unsubscribe(Some("posts")).await?;
//! ```

pub mod builder;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod registry;
pub mod router;
pub mod service;
pub mod sse;
pub mod transport;
pub mod types;

pub use builder::RealtimeBuilder;
pub use config::{RealtimeConfig, REALTIME_PATH};
pub use connection::{ConnectionManager, ConnectionState, StreamClosed};
pub use coordinator::{DisconnectHook, PendingSync};
pub use error::{RealtimeError, Result};
pub use registry::{invoke_listeners, AddOutcome, Listener, SharedRegistry, SubscriptionRegistry};
pub use router::{decode_payload, DispatchRouter};
pub use service::Realtime;
pub use sse::{parse_event_stream, SseEvent};
pub use transport::{
    EventStream, SetSubscriptionsRequest, SseTransport, StreamTransport, SubscriptionTransport,
};
pub use types::{subscription_key, ClientId, SubscriptionOptions, CONNECT_EVENT};
