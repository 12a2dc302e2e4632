//! Error types for the realtime crate.

use std::time::Duration;

use http_client::ClientError;

/// Errors that can occur while managing realtime subscriptions.
///
/// Every variant is `Clone` so a single reconciliation outcome can be handed
/// to all subscribe/unsubscribe calls that were waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RealtimeError {
    /// The event stream failed to open or dropped
    #[error("Connection error: {0}")]
    Connection(String),

    /// The stream did not confirm a client id in time
    #[error("Timed out after {0:?} waiting for the realtime connection")]
    ConnectTimeout(Duration),

    /// The "set subscriptions" request was rejected or failed in transit
    #[error("Failed to submit subscriptions: {0}")]
    Reconciliation(#[from] ClientError),

    /// An inbound payload could not be decoded
    #[error("Failed to decode payload for topic {topic}: {message}")]
    Decode {
        /// The event name the payload arrived under
        topic: String,
        /// Parser error
        message: String,
    },

    /// The caller passed invalid arguments
    #[error("Invalid usage: {0}")]
    Usage(String),

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The background coordinator is no longer running
    #[error("Realtime service has been shut down")]
    Shutdown,

    /// A listener panicked while the registry lock was held
    #[error("Subscription registry lock poisoned")]
    LockPoisoned,
}

impl RealtimeError {
    /// Whether retrying the same operation later can succeed
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            RealtimeError::Usage(_) | RealtimeError::Configuration(_) | RealtimeError::Shutdown
        )
    }
}

/// Convenience type alias for Results using RealtimeError.
pub type Result<T> = std::result::Result<T, RealtimeError>;
