//! # SSE Parser
//!
//! Turns the chunked body of a `text/event-stream` response into complete
//! events. Handles:
//! - Line buffering across chunk boundaries (LF or CRLF)
//! - `event`, `data` and `id` fields, with multi-line `data` joined by `\n`
//! - `:` comment lines (server keep-alives)
//! - A final event that is not followed by a blank line

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

use crate::error::{RealtimeError, Result};

/// Event name used when a frame carries no `event` field
pub const DEFAULT_EVENT: &str = "message";

/// Longest line accepted before the stream is treated as broken
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// A single server-sent event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub id: Option<String>,
    pub event: String,
    pub data: String,
}

impl SseEvent {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: None,
            event: event.into(),
            data: data.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Accumulates field lines until a blank line completes the event
#[derive(Debug, Default)]
pub struct SseFrameBuilder {
    id: Option<String>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseFrameBuilder {
    /// Feed one line (without its terminator); returns an event when the
    /// line completes one
    pub fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.finish();
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            // `retry` and unknown fields are ignored
            _ => {}
        }

        None
    }

    /// Complete the pending frame, if it carries anything
    pub fn finish(&mut self) -> Option<SseEvent> {
        let frame = std::mem::take(self);

        if frame.event.is_none() && frame.data.is_empty() {
            return None;
        }

        Some(SseEvent {
            id: frame.id,
            event: frame.event.unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data: frame.data.join("\n"),
        })
    }
}

/// Parse a chunked byte stream into server-sent events.
///
/// The returned stream ends when the byte stream ends. A read error is
/// yielded once as [`RealtimeError::Connection`] and ends the stream.
pub fn parse_event_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<SseEvent>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    futures::stream::unfold(
        (
            Box::pin(byte_stream),
            BytesMut::with_capacity(8192),
            SseFrameBuilder::default(),
            false,
        ),
        |(mut stream, mut buffer, mut frame, done)| async move {
            if done {
                return None;
            }

            loop {
                if let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                    let mut line_bytes = buffer.split_to(newline_pos + 1);
                    line_bytes.truncate(line_bytes.len() - 1);
                    if line_bytes.last() == Some(&b'\r') {
                        line_bytes.truncate(line_bytes.len() - 1);
                    }

                    let line = match std::str::from_utf8(&line_bytes) {
                        Ok(s) => s,
                        Err(_) => {
                            tracing::warn!("Skipping SSE line with invalid UTF-8");
                            continue;
                        }
                    };

                    if let Some(event) = frame.push_line(line) {
                        return Some((Ok(event), (stream, buffer, frame, false)));
                    }
                    continue;
                }

                if buffer.len() > MAX_LINE_BYTES {
                    let error = RealtimeError::Connection(format!(
                        "Event stream line exceeds {} bytes",
                        MAX_LINE_BYTES
                    ));
                    buffer.clear();
                    return Some((Err(error), (stream, buffer, frame, true)));
                }

                match stream.next().await {
                    Some(Ok(chunk)) => {
                        buffer.extend_from_slice(&chunk);
                    }
                    Some(Err(e)) => {
                        let error =
                            RealtimeError::Connection(format!("Event stream read error: {}", e));
                        return Some((Err(error), (stream, buffer, frame, true)));
                    }
                    None => {
                        // Stream ended: flush a trailing unterminated line and frame
                        let trailing = std::str::from_utf8(&buffer)
                            .map(|s| s.trim_end_matches('\r').to_string());
                        buffer.clear();

                        if let Ok(line) = trailing {
                            if !line.is_empty() {
                                if let Some(event) = frame.push_line(&line) {
                                    return Some((Ok(event), (stream, buffer, frame, true)));
                                }
                            }
                        }

                        return frame
                            .finish()
                            .map(|event| (Ok(event), (stream, buffer, frame, true)));
                    }
                }
            }
        },
    )
}
