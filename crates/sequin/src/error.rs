//! Typed errors for every boundary of the engine.
//!
//! Budget rejection is deliberately absent: a message too large for the
//! context is an expected outcome reported through
//! [`Admission::Rejected`](crate::context::window::Admission), not an error.

use crate::Role;
use std::path::PathBuf;
use thiserror::Error;

/// A message with an invalid shape for its role.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("a function call is only valid on assistant messages, not {0}")]
    CallOnRole(Role),
    #[error("function messages must name the producing function")]
    MissingFunctionName,
    #[error("a name is only valid on function messages, not {0}")]
    NameOnRole(Role),
    #[error("{0} message has neither content nor a function call")]
    Empty(Role),
    #[error("function call has an empty name")]
    EmptyCallName,
}

/// Invalid or unreadable configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(
        "max_tokens ({max_tokens}) must be smaller than the context length ({length}); upper bound would be {upper_bound}"
    )]
    NonPositiveUpperBound {
        length: usize,
        max_tokens: usize,
        upper_bound: i64,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("reserve fraction must be in [0, 1), got {0}")]
    Reserve(f64),
    #[error("invalid session name {0:?}")]
    SessionName(String),
}

/// Failure to persist a sequence to disk.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize sequence: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to move {from} into place: {source}")]
    Rename {
        from: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to hand an evicted message to the long-term archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode archive record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("archive unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a completion request.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("cannot request a completion for an empty sequence")]
    EmptySequence,
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error ({status}): {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode completion: {0}")]
    Decode(String),
    #[error("completion contained no choices")]
    NoChoices,
}

/// Failure of a function-call round trip. Every variant ends the round with
/// no function-result message for the failing call.
#[derive(Debug, Error)]
pub enum MediatorError {
    #[error("no function named {0:?} is registered")]
    FunctionNotFound(String),
    #[error("invalid arguments for {name}: {reason}")]
    Decode { name: String, reason: String },
    #[error("function {name} failed: {reason}")]
    Execution { name: String, reason: String },
    #[error("function call chain exceeded {limit} calls")]
    ChainLimit { limit: usize },
    #[error("{what} ({tokens} tokens) exceeds the context upper bound ({upper_bound})")]
    Rejected {
        what: &'static str,
        tokens: usize,
        upper_bound: usize,
    },
    #[error("{what} refused: the session has no system message (was it loaded?)")]
    Unanchored { what: &'static str },
    #[error("follow-up completion failed: {0}")]
    Provider(#[from] ProviderError),
}

/// Failure at the session façade.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to persist {which}: {source}")]
    Persist {
        which: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("failed to persist session: context: {context}; transcript: {transcript}")]
    PersistBoth {
        context: StoreError,
        transcript: StoreError,
    },
    #[error("failed to delete {path}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to list sessions in {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure reported by a [`Function`](crate::functions::Function) itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FunctionError {
    /// The decoded arguments do not fit the function's parameters.
    #[error("{0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Failed(String),
}

impl From<String> for FunctionError {
    fn from(reason: String) -> Self {
        FunctionError::Failed(reason)
    }
}
