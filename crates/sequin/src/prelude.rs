//! Convenience re-exports for common `sequin` types.
//!
//! ```ignore
//! use sequin::prelude::*;
//! ```
//!
//! Pulls in what a chat front end needs: [`Message`], [`Config`],
//! [`Session`], [`Mediator`], [`ChatClient`], and the function registry.
//! Streaming internals and the individual oracles stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{FunctionCall, Message, Role, json_schema_for};

// ── Configuration and errors ────────────────────────────────────────
pub use crate::config::{Config, TokenizerKind};
pub use crate::error::{
    ArchiveError, ConfigError, FunctionError, MediatorError, ProviderError, SessionError,
    StoreError,
};

// ── Conversation runtime ────────────────────────────────────────────
pub use crate::agent::{
    ExecutedCall, Mediator, RoundOutcome, Session, SessionDirectory, SessionStart,
};
pub use crate::api::{ChatClient, Provider};
pub use crate::context::{Admission, Archive, Budget, JsonlArchive, TokenOracle};

// ── Functions ───────────────────────────────────────────────────────
pub use crate::functions::{FnFunction, Function, FunctionDef, FunctionFuture, FunctionRegistry};
