use http_client::ClientError;
use realtime::RealtimeError;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SdkError {
    #[error("HTTP error: {0}")]
    Http(#[from] ClientError),

    #[error("Realtime error: {0}")]
    Realtime(#[from] RealtimeError),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),
}

pub type Result<T> = std::result::Result<T, SdkError>;
