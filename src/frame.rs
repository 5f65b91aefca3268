//! Line framing and payload decoding for the activity event stream
//!
//! The stream body is newline-delimited text. Lines starting with `:` are
//! keepalive comments, `data: ` lines carry a JSON payload whose `type`
//! field decides how the feed reacts.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{FeedError, Result};
use crate::event::ActivityEvent;

/// Accumulates raw body chunks and yields complete lines.
///
/// Buffering happens on bytes, so a multi-byte character split across two
/// chunks still decodes correctly once its line is complete.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns every line completed by it, without terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let raw = &self.pending[start..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            lines.push(String::from_utf8_lossy(raw).into_owned());
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Bytes of the incomplete trailing line
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// What a single stream line amounts to
#[derive(Debug, PartialEq)]
pub enum Line<'a> {
    Blank,
    Comment(&'a str),
    Data(&'a str),
    /// `event:`, `id:`, `retry:` and anything else the feed does not act on
    Other(&'a str),
}

pub fn classify_line(line: &str) -> Line<'_> {
    if line.trim().is_empty() {
        Line::Blank
    } else if let Some(comment) = line.strip_prefix(':') {
        Line::Comment(comment.trim_start())
    } else if let Some(data) = line.strip_prefix("data:") {
        Line::Data(data.strip_prefix(' ').unwrap_or(data))
    } else {
        Line::Other(line)
    }
}

/// Decoded `data:` payload
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Connected,
    Heartbeat,
    RecentEvents(Vec<ActivityEvent>),
    Activity(ActivityEvent),
    Unknown(String),
}

#[derive(Deserialize)]
struct RecentEventsPayload {
    #[serde(default)]
    events: Vec<ActivityEvent>,
}

/// Decode one `data:` payload.
///
/// `activity_event` messages carry the event under `data`; older servers put
/// the event fields inline next to `type`, which is accepted too.
pub fn decode_message(payload: &str) -> Result<StreamMessage> {
    let mut value: Value = serde_json::from_str(payload)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| FeedError::Stream("payload without a type field".to_string()))?
        .to_string();

    let message = match kind.as_str() {
        "connected" => StreamMessage::Connected,
        "heartbeat" => StreamMessage::Heartbeat,
        "recent_events" => {
            let payload: RecentEventsPayload = serde_json::from_value(value)?;
            StreamMessage::RecentEvents(payload.events)
        }
        "activity_event" => {
            let nested = value.get("data").is_some_and(Value::is_object);
            let event = if nested {
                value
                    .get_mut("data")
                    .map(Value::take)
                    .unwrap_or_default()
            } else {
                value
            };
            StreamMessage::Activity(serde_json::from_value(event)?)
        }
        _ => StreamMessage::Unknown(kind),
    };
    Ok(message)
}
