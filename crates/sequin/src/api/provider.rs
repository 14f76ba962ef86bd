//! The seam between the engine and a text-generation backend.

use crate::Message;
use crate::error::ProviderError;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`Provider::complete`].
pub type CompletionFuture<'a> = Pin<Box<dyn Future<Output = Result<Message, ProviderError>> + Send + 'a>>;

/// Callback receiving content fragments as they stream in.
pub type DeltaSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// A backend that produces the next assistant message for a sequence.
///
/// Implementations report streamed content through `on_delta` and resolve to
/// one complete assistant message, which may carry a function call. An
/// empty `messages` slice is [`ProviderError::EmptySequence`].
pub trait Provider: Send + Sync {
    fn complete<'a>(&'a self, messages: &'a [Message], on_delta: DeltaSink<'a>) -> CompletionFuture<'a>;
}
