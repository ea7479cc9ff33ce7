//! Vendor side of the proxy.
//!
//! Request translation into the vendor payload, the HTTP client that carries
//! it, and decoding of the vendor's event stream.

pub mod client;
pub mod events;
pub mod payload;

pub use client::{IdeToken, UpstreamClient};
pub use events::{event_stream, EventParser, StreamItem, UpstreamEvent};
pub use payload::{build_payload, ChatPayload, HistoryEntry};
