//! Error types for the HTTP client

use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Message used when the server response carries no usable error message.
pub const DEFAULT_ERROR_MESSAGE: &str = "Something went wrong while processing your request.";

/// Broad classification of a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request never produced a response (DNS, refused connection, reset)
    Network,
    /// The request exceeded its timeout
    Timeout,
    /// The request was cancelled before it completed
    Aborted,
    /// The server answered with a 4xx/5xx status
    Server,
    /// The request could not be built or its body could not be encoded
    Request,
    /// A successful response body did not match the expected type
    Decode,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Network => write!(f, "network"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Aborted => write!(f, "aborted"),
            ErrorKind::Server => write!(f, "server"),
            ErrorKind::Request => write!(f, "request"),
            ErrorKind::Decode => write!(f, "decode"),
        }
    }
}

/// Uniform error returned by every [`HttpClient`](crate::HttpClient) call
///
/// Transport failures and server rejections share this shape so callers can
/// branch on `kind`/`status` without matching on reqwest internals.
#[derive(Error, Debug, Clone)]
#[error("{kind} error (status {status}) for {url}: {message}")]
pub struct ClientError {
    /// What went wrong
    pub kind: ErrorKind,
    /// The requested URL
    pub url: String,
    /// HTTP status, `0` when no response was received
    pub status: u16,
    /// Human readable message, taken from the server body when present
    pub message: String,
    /// Decoded server error body (`{}` when absent)
    pub response: Value,
}

impl ClientError {
    /// Build an error from a reqwest transport failure
    pub fn from_transport(url: &str, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_builder() || err.is_body() {
            ErrorKind::Request
        } else {
            ErrorKind::Network
        };

        Self {
            kind,
            url: url.to_string(),
            status: err.status().map(|s| s.as_u16()).unwrap_or(0),
            message: err.to_string(),
            response: Value::Object(Default::default()),
        }
    }

    /// Build an error from a 4xx/5xx response body
    pub fn from_response(url: &str, status: u16, response: Value) -> Self {
        let message = response
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_ERROR_MESSAGE)
            .to_string();

        Self {
            kind: ErrorKind::Server,
            url: url.to_string(),
            status,
            message,
            response,
        }
    }

    /// Error for a body that could not be decoded into the requested type
    pub fn decode(url: &str, status: u16, err: &serde_json::Error) -> Self {
        Self {
            kind: ErrorKind::Decode,
            url: url.to_string(),
            status,
            message: err.to_string(),
            response: Value::Object(Default::default()),
        }
    }

    /// Error for a request dropped before completion
    pub fn aborted(url: &str) -> Self {
        Self {
            kind: ErrorKind::Aborted,
            url: url.to_string(),
            status: 0,
            message: "The request was aborted.".to_string(),
            response: Value::Object(Default::default()),
        }
    }

    /// Whether the request was cancelled rather than rejected
    pub fn is_abort(&self) -> bool {
        self.kind == ErrorKind::Aborted
    }

    /// Field-level validation errors from the server body, if any
    pub fn data(&self) -> Option<&Value> {
        self.response.get("data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_response_uses_server_message() {
        let body = json!({
            "code": 400,
            "message": "Failed to load the submitted data.",
            "data": { "clientId": { "code": "validation_required" } }
        });

        let error = ClientError::from_response("http://127.0.0.1:8090/api/realtime", 400, body);
        assert_eq!(error.kind, ErrorKind::Server);
        assert_eq!(error.status, 400);
        assert_eq!(error.message, "Failed to load the submitted data.");
        assert!(error.data().unwrap().get("clientId").is_some());
        assert!(!error.is_abort());
    }

    #[test]
    fn test_from_response_falls_back_to_default_message() {
        let error = ClientError::from_response("http://localhost/api", 500, json!({}));
        assert_eq!(error.message, DEFAULT_ERROR_MESSAGE);

        let error = ClientError::from_response("http://localhost/api", 502, json!({ "message": "" }));
        assert_eq!(error.message, DEFAULT_ERROR_MESSAGE);
    }

    #[test]
    fn test_display() {
        let error = ClientError::from_response("http://localhost/api", 404, json!({ "message": "Missing" }));
        assert_eq!(
            error.to_string(),
            "server error (status 404) for http://localhost/api: Missing"
        );

        let error = ClientError::aborted("http://localhost/api");
        assert!(error.is_abort());
        assert!(error.to_string().starts_with("aborted error (status 0)"));
    }
}
