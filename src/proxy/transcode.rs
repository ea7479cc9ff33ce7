//! Transcoding of vendor events into OpenAI chat completion output.
//!
//! [`Transcoder`] holds the per-request state and maps one [`StreamItem`]
//! at a time. [`stream_chunks`] drives it for streaming clients, producing
//! SSE frames; [`collect_completion`] drives it for buffered clients,
//! producing a single completion object.

use std::ops::ControlFlow;

use bytes::Bytes;
use futures::{Stream, StreamExt};

use super::types::{
    ChatCompletionChunk, ChatCompletionResponse, Choice, ChunkChoice, Delta, Message, Role,
    CHUNK_OBJECT, COMPLETION_OBJECT, FINISH_REASON_STOP,
};
use crate::error::Result;
use crate::upstream::{StreamItem, UpstreamEvent};

/// Final SSE frame of every streamed answer.
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// How the client receives the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One SSE frame per upstream output event.
    Streaming,
    /// Text accumulated into a single completion.
    Buffered,
}

/// Per-request transcoding state.
#[derive(Debug)]
pub struct Transcoder {
    mode: Mode,
    model: String,
    created: i64,
    completion_id: Option<String>,
    content: String,
}

impl Transcoder {
    pub fn new(mode: Mode, model: impl Into<String>) -> Self {
        Self {
            mode,
            model: model.into(),
            created: chrono::Utc::now().timestamp(),
            completion_id: None,
            content: String::new(),
        }
    }

    /// Id from the most recent metadata event that carried one.
    pub fn completion_id(&self) -> Option<&str> {
        self.completion_id.as_deref()
    }

    /// Text accumulated so far. Always empty in streaming mode.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Apply one stream item, appending any frames to send to `frames`.
    ///
    /// Returns `Break` once the answer is complete and no further items
    /// should be read.
    pub fn handle(&mut self, item: StreamItem, frames: &mut Vec<Bytes>) -> ControlFlow<()> {
        let event = match item {
            StreamItem::Terminator => {
                if self.mode == Mode::Streaming {
                    frames.push(Bytes::from_static(DONE_FRAME));
                }
                return ControlFlow::Break(());
            }
            StreamItem::Event(event) => event,
        };

        match event {
            UpstreamEvent::Metadata {
                prompt_completion_id: Some(id),
            } => {
                self.completion_id = Some(id);
            }
            UpstreamEvent::Metadata {
                prompt_completion_id: None,
            } => {}
            UpstreamEvent::Output {
                response: Some(text),
            } => match self.mode {
                Mode::Streaming => {
                    let delta = Delta {
                        role: Some(Role::Assistant),
                        content: Some(text),
                    };
                    self.push_chunk(delta, None, frames);
                }
                Mode::Buffered => self.content.push_str(&text),
            },
            UpstreamEvent::Output { response: None } => {}
            UpstreamEvent::Done => {
                if self.mode == Mode::Streaming {
                    let delta = Delta {
                        role: Some(Role::Assistant),
                        content: None,
                    };
                    self.push_chunk(delta, Some(FINISH_REASON_STOP), frames);
                    frames.push(Bytes::from_static(DONE_FRAME));
                }
                return ControlFlow::Break(());
            }
            UpstreamEvent::Unknown { name, .. } => {
                tracing::debug!(event = %name, "Ignoring upstream event");
            }
        }

        ControlFlow::Continue(())
    }

    fn push_chunk(&self, delta: Delta, finish_reason: Option<&str>, frames: &mut Vec<Bytes>) {
        let chunk = ChatCompletionChunk {
            id: self.completion_id.clone().unwrap_or_default(),
            object: CHUNK_OBJECT.to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(str::to_string),
            }],
        };

        match serde_json::to_string(&chunk) {
            Ok(json) => frames.push(Bytes::from(format!("data: {}\n\n", json))),
            Err(e) => tracing::error!(error = %e, "Failed to encode chunk"),
        }
    }

    /// Build the buffered completion from the accumulated state.
    pub fn into_completion(self) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: self.completion_id.unwrap_or_default(),
            object: COMPLETION_OBJECT.to_string(),
            created: chrono::Utc::now().timestamp(),
            model: self.model,
            choices: vec![Choice {
                index: 0,
                message: Message::new(Role::Assistant, self.content),
                finish_reason: Some(FINISH_REASON_STOP.to_string()),
            }],
        }
    }
}

/// Turn upstream items into OpenAI SSE frames, one `Bytes` per frame.
///
/// A read error ends the stream without a closing frame; headers are already
/// on the wire by then.
pub fn stream_chunks<S>(
    items: S,
    model: String,
) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send
where
    S: Stream<Item = Result<StreamItem>> + Send + 'static,
{
    async_stream::stream! {
        let mut transcoder = Transcoder::new(Mode::Streaming, model);
        let mut items = Box::pin(items);
        let mut frames = Vec::new();

        while let Some(item) = items.next().await {
            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    tracing::error!(error = %e, "Upstream stream failed, closing client stream");
                    return;
                }
            };

            let flow = transcoder.handle(item, &mut frames);
            for frame in frames.drain(..) {
                yield Ok::<Bytes, std::io::Error>(frame);
            }
            if flow.is_break() {
                return;
            }
        }

        tracing::debug!("Upstream stream ended without a done event");
    }
}

/// Consume upstream items and build one completion.
///
/// A read error is returned to the caller instead of a partial answer.
pub async fn collect_completion<S>(items: S, model: String) -> Result<ChatCompletionResponse>
where
    S: Stream<Item = Result<StreamItem>>,
{
    let mut transcoder = Transcoder::new(Mode::Buffered, model);
    let mut items = std::pin::pin!(items);
    let mut frames = Vec::new();

    while let Some(item) = items.next().await {
        let item =
            item.inspect_err(|e| tracing::error!(error = %e, "Error reading upstream stream"))?;
        if transcoder.handle(item, &mut frames).is_break() {
            break;
        }
    }

    Ok(transcoder.into_completion())
}
