//! Token-bounded conversation engine for terminal chat assistants.
//!
//! `sequin` keeps a conversation with a text-generation backend inside the
//! backend's context-length contract. The core abstraction is the
//! [`Session`](agent::session::Session): a bounded working context that
//! evicts its oldest non-system messages when a new message would overflow
//! the token budget, plus an unbounded transcript that records every message
//! ever produced. Both are persisted as JSON arrays under the session name.
//!
//! # Getting started
//!
//! ```ignore
//! use sequin::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("sequin.json")?;
//!     let oracle = config.context.tokenizer.build(&config.provider.model);
//!
//!     let mut session = Session::open("default", &config, oracle, None)?;
//!     session.load(Message::system(&config.system_prompt))?;
//!
//!     let registry = FunctionRegistry::new().with_builtin_functions(".");
//!     let client = ChatClient::from_config(&config)?.with_functions(registry.definitions());
//!     let mediator = Mediator::new(&registry, config.functions.max_chain);
//!
//!     session.enqueue(Message::user("What's the weather in Paris?"));
//!     let reply = client.complete(session.messages(), &mut |delta| print!("{delta}")).await?;
//!     mediator.handle_reply(&mut session, &client, reply, &mut |d| print!("{d}")).await?;
//!     session.save()?;
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Counting tokens:** the [`TokenOracle`](context::oracle::TokenOracle)
//!   trait and its tiktoken, heuristic, and word-count implementations.
//! - **Budget arithmetic:** [`Budget`](context::budget::Budget) derives the
//!   upper bound and reserved upper bound from configuration.
//! - **Eviction:** [`ContextWindow`](context::window::ContextWindow) and the
//!   optional [`Archive`](context::archive::Archive) hand-off.
//! - **Persistence:** [`SequenceStore`](sequence::store::SequenceStore) and
//!   [`Transcript`](sequence::transcript::Transcript).
//! - **Function calls:** [`FunctionRegistry`](functions::core::FunctionRegistry)
//!   and the [`Mediator`](agent::mediator::Mediator) round trip.
//! - **Backends:** the [`Provider`](api::provider::Provider) trait and the
//!   OpenAI-compatible [`ChatClient`](api::client::ChatClient).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`agent`] | [`Session`](agent::session::Session) façade, session directory, function-call mediator |
//! | [`context`] | Token oracle, budget policy, context window eviction, archive |
//! | [`sequence`] | Durable sequence store and unbounded transcript |
//! | [`functions`] | Function trait, registry, built-in functions |
//! | [`api`] | Provider trait, chat completions client, SSE streaming |
//! | [`config`] | JSON configuration file |
//! | [`error`] | Typed errors for every boundary |

pub mod agent;
pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod functions;
pub mod prelude;
pub mod sequence;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use error::MessageError;

// Re-export schemars for downstream crates.
pub use schemars;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. Used for function parameter definitions.
///
/// # Example
///
/// ```
/// use sequin::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct WeatherArgs {
///     location: String,
///     #[serde(default)]
///     unit: Option<String>,
/// }
///
/// let schema = json_schema_for::<WeatherArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"location".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Function => write!(f, "function"),
        }
    }
}

/// A function invocation requested by the assistant.
///
/// `arguments` is the raw serialized JSON payload exactly as the backend
/// produced it. Decoding happens in the mediator, so a malformed payload is
/// still recorded faithfully in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Wire and disk shape of a message. Every [`Message`] passes through this
/// type on (de)serialization so that invalid shapes are rejected at the
/// boundary instead of at first field access.
#[derive(Serialize, Deserialize, Clone, Debug)]
struct RawMessage {
    role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

/// A single role-tagged message.
///
/// Messages are immutable: fields are only readable, and sequences replace
/// whole entries rather than editing them in place. Construction is checked:
///
/// - `call` is only allowed on assistant messages;
/// - `name` is required on function messages and rejected elsewhere;
/// - a message must carry content, a call, or both.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(try_from = "RawMessage", into = "RawMessage")]
pub struct Message {
    role: Role,
    content: Option<String>,
    call: Option<FunctionCall>,
    name: Option<String>,
}

impl Message {
    /// Build a message from its parts, validating the shape for the role.
    pub fn new(
        role: Role,
        content: Option<String>,
        call: Option<FunctionCall>,
        name: Option<String>,
    ) -> Result<Self, MessageError> {
        if call.is_some() && role != Role::Assistant {
            return Err(MessageError::CallOnRole(role));
        }
        match (role, &name) {
            (Role::Function, None) => return Err(MessageError::MissingFunctionName),
            (Role::Function, Some(n)) if n.is_empty() => {
                return Err(MessageError::MissingFunctionName);
            }
            (Role::Function, Some(_)) | (_, None) => {}
            (other, Some(_)) => return Err(MessageError::NameOnRole(other)),
        }
        if content.is_none() && call.is_none() {
            return Err(MessageError::Empty(role));
        }
        if let Some(ref c) = call
            && c.name.is_empty()
        {
            return Err(MessageError::EmptyCallName);
        }
        Ok(Self {
            role,
            content,
            call,
            name,
        })
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            call: None,
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            call: None,
            name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            call: None,
            name: None,
        }
    }

    /// An assistant message requesting a function invocation.
    pub fn function_call(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            call: Some(FunctionCall::new(name, arguments)),
            name: None,
        }
    }

    /// A function-role message carrying a function's result.
    pub fn function_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Function,
            content: Some(content.into()),
            call: None,
            name: Some(name.into()),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn call(&self) -> Option<&FunctionCall> {
        self.call.as_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }

    /// Whether this message asks for a function to be run.
    pub fn is_call(&self) -> bool {
        self.call.is_some()
    }
}

impl TryFrom<RawMessage> for Message {
    type Error = MessageError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        Message::new(raw.role, raw.content, raw.function_call, raw.name)
    }
}

impl From<Message> for RawMessage {
    fn from(msg: Message) -> Self {
        RawMessage {
            role: msg.role,
            content: msg.content,
            function_call: msg.call,
            name: msg.name,
        }
    }
}
