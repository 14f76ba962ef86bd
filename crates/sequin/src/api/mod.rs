//! Backend interaction layer.
//!
//! - [`provider`]: the [`Provider`] trait the engine talks to.
//! - [`client`]: [`ChatClient`], a [`Provider`] for OpenAI-compatible
//!   `/chat/completions` endpoints.
//! - [`streaming`]: SSE parser for incremental content and function-call
//!   deltas.

pub mod client;
pub mod provider;
pub mod streaming;

pub use client::{ChatClient, ChatRequest};
pub use provider::{CompletionFuture, DeltaSink, Provider};
pub use streaming::{SseParser, StreamEvent};
