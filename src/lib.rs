//! trae-proxy - OpenAI-compatible proxy for the Trae IDE chat backend
//!
//! This library provides the core functionality for the proxy: translating
//! OpenAI chat requests into the vendor payload, decoding the vendor's event
//! stream, and transcoding it back into OpenAI chunks or completions.

pub mod config;
pub mod error;
pub mod proxy;
pub mod upstream;

pub use config::Config;
pub use error::{Error, Result};
