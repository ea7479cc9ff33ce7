//! Decoding of the vendor's line-oriented event stream.
//!
//! The vendor speaks a loose SSE dialect: an `event:` line names every
//! following `data:` line until the next `event:` line, blank lines carry no
//! meaning, and `data: [DONE]` ends the stream. [`EventParser`] reassembles
//! lines across chunk boundaries and turns them into typed [`StreamItem`]s;
//! [`event_stream`] drives it over a response body.

use std::collections::VecDeque;
use std::fmt::Display;

use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Longest line kept in the reassembly buffer before it is dropped.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Literal payload that terminates the stream.
const DONE_SENTINEL: &str = "[DONE]";

/// A decoded vendor event.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// `event: metadata`
    Metadata { prompt_completion_id: Option<String> },
    /// `event: output`; `response` is the next slice of assistant text.
    Output { response: Option<String> },
    /// `event: done`
    Done,
    /// Any other event name, including none at all.
    Unknown { name: String, raw: Value },
}

/// One item produced by the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Event(UpstreamEvent),
    /// `data: [DONE]`
    Terminator,
}

/// Fields shared by the vendor's event payloads.
#[derive(Debug, Default, Deserialize)]
struct EventFields {
    #[serde(default)]
    prompt_completion_id: Option<Value>,
    #[serde(default)]
    response: Option<Value>,
}

impl UpstreamEvent {
    /// Classify a parsed `data:` payload under the given event name.
    pub fn decode(name: &str, raw: Value) -> Self {
        let fields = EventFields::deserialize(&raw).unwrap_or_default();

        match name {
            "metadata" => UpstreamEvent::Metadata {
                prompt_completion_id: fields.prompt_completion_id.and_then(scalar_to_string),
            },
            "output" => UpstreamEvent::Output {
                response: fields
                    .response
                    .and_then(|v| v.as_str().map(str::to_string)),
            },
            "done" => UpstreamEvent::Done,
            _ => UpstreamEvent::Unknown {
                name: name.to_string(),
                raw,
            },
        }
    }
}

/// Render an id that may arrive as a string or a number.
fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Incremental parser state.
///
/// Bytes go in through [`feed`](Self::feed); decoded items come out of
/// [`next_item`](Self::next_item) in the order their lines were read.
#[derive(Debug, Default)]
pub struct EventParser {
    current_event: String,
    buffer: Vec<u8>,
    pending: VecDeque<StreamItem>,
    terminated: bool,
    /// Set while skipping the tail of an oversized line.
    discarding: bool,
}

impl EventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `data: [DONE]` has been seen. No further items are produced after it.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Take the next decoded item, if any.
    pub fn next_item(&mut self) -> Option<StreamItem> {
        self.pending.pop_front()
    }

    /// Process a chunk of bytes from the response body.
    pub fn feed(&mut self, mut bytes: &[u8]) {
        if self.terminated {
            return;
        }
        if self.discarding {
            match bytes.iter().position(|&b| b == b'\n') {
                Some(offset) => {
                    self.discarding = false;
                    bytes = &bytes[offset + 1..];
                }
                None => return,
            }
        }
        self.buffer.extend_from_slice(bytes);

        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
            start = end + 1;

            self.process_line(&line);
            if self.terminated {
                self.buffer.clear();
                return;
            }
        }
        self.buffer.drain(..start);

        // The rest of the line is skipped up to its newline.
        if self.buffer.len() > MAX_LINE_BYTES {
            tracing::warn!(
                bytes = self.buffer.len(),
                "Dropping oversized upstream line without newline"
            );
            self.buffer.clear();
            self.discarding = true;
        }
    }

    /// Flush a final line that was not newline-terminated.
    pub fn finish(&mut self) {
        if self.terminated || self.discarding || self.buffer.is_empty() {
            return;
        }
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest).into_owned();
        self.process_line(&line);
    }

    /// Process a single complete line.
    fn process_line(&mut self, line: &str) {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return;
        }

        if let Some(name) = line.strip_prefix("event:") {
            self.current_event = name.trim().to_string();
        } else if let Some(data) = line.strip_prefix("data:") {
            self.process_data(data.trim());
        }
    }

    /// Process the payload of a `data:` line.
    fn process_data(&mut self, data: &str) {
        if data == DONE_SENTINEL {
            self.pending.push_back(StreamItem::Terminator);
            self.terminated = true;
            return;
        }

        match serde_json::from_str::<serde_json::Map<String, Value>>(data) {
            Ok(object) => {
                let event = UpstreamEvent::decode(&self.current_event, Value::Object(object));
                self.pending.push_back(StreamItem::Event(event));
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    event = %self.current_event,
                    data = %data,
                    "Skipping malformed upstream event"
                );
            }
        }
    }
}

/// Decode a response body into a lazy sequence of stream items.
///
/// The sequence ends after [`StreamItem::Terminator`], at end of input, or
/// after yielding a single [`Error::StreamRead`] when the body fails.
pub fn event_stream<S, B, E>(body: S) -> impl Stream<Item = Result<StreamItem>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    async_stream::stream! {
        let mut parser = EventParser::new();
        let mut body = Box::pin(body);

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    parser.feed(bytes.as_ref());
                    while let Some(item) = parser.next_item() {
                        yield Ok(item);
                    }
                    if parser.is_terminated() {
                        return;
                    }
                }
                Err(e) => {
                    yield Err(Error::StreamRead(e.to_string()));
                    return;
                }
            }
        }

        parser.finish();
        while let Some(item) = parser.next_item() {
            yield Ok(item);
        }
    }
}
