//! # PocketBase SDK - realtime record subscriptions
//!
//! A client for a PocketBase backend whose centerpiece is the realtime
//! subscription manager: one server-sent-events stream shared by every
//! subscription, with the server's subscription set kept in step with the
//! local one.
//!
//! ```rust,no_run
//! use pocketbase_sdk::{PocketBase, RecordAction};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pocketbase_sdk::SdkError> {
//!     let client = PocketBase::new("http://127.0.0.1:8090")?;
//!     let posts = client.collection("posts");
//!
//!     posts
//!         .subscribe("*", |event| {
//!             if event.action == RecordAction::Create {
//!                 println!("new post {:?}", event.record_id());
//!             }
//!         }, None)
//!         .await?;
//!
//!     // ...
//!     posts.unsubscribe(None).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! pocketbase-sdk (PocketBase, RecordService)
//!     ↓
//! realtime (registry, connection, sync coordinator, dispatch)
//!     ↓
//! http-client (REST transport, error normalization)
//! ```

pub use client::PocketBase;
pub use error::{Result, SdkError};
pub use record::{record_topic, RecordAction, RecordService, RecordSubscription, ALL_RECORDS};

// Re-export the layers underneath
pub use http_client::{ClientError, ErrorKind, HttpClient, HttpClientConfig, SendOptions};
pub use realtime::{
    ConnectionState, PendingSync, Realtime, RealtimeBuilder, RealtimeConfig, RealtimeError,
    SubscriptionOptions,
};

mod client;
mod error;
pub mod logging;
mod record;
