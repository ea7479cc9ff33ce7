//! HTTP proxy server module.
//!
//! This module provides the OpenAI-compatible HTTP API that accepts
//! requests, forwards them to the vendor, and transcodes the answers.

mod handlers;
mod server;
pub mod transcode;
pub mod types;

pub use handlers::PROXIED_MODEL_HEADER;
pub use server::{create_router, run_server, AppState};
pub use transcode::{collect_completion, stream_chunks, Mode, Transcoder};
pub use types::{ChatCompletionRequest, ChatCompletionResponse, Message, Role};
