//! Function abstraction for backend function calling.
//!
//! The [`Function`] trait defines what every callable function provides: a
//! static definition (name, description, JSON schema) and an async `call`
//! that receives already-decoded object arguments. Functions are collected
//! into a [`FunctionRegistry`], which resolves names, exports definitions for
//! the backend, and runs calls with timing, an optional timeout, and result
//! truncation.

use crate::error::FunctionError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Maximum size (in bytes) for function output before truncation.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 8_000;

/// Boxed future returned by [`Function::call`].
pub type FunctionFuture<'a> =
    Pin<Box<dyn Future<Output = Result<String, FunctionError>> + Send + 'a>>;

/// Decoded call arguments: always a JSON object.
pub type Arguments = Map<String, Value>;

/// What the backend is told about a function.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    /// JSON Schema of the argument object.
    pub parameters: Value,
}

impl FunctionDef {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

// ── Function trait ─────────────────────────────────────────────────

/// A function the backend may ask to have run.
///
/// # Example
///
/// ```ignore
/// struct Clock;
///
/// impl Function for Clock {
///     fn definition(&self) -> FunctionDef {
///         FunctionDef::new("now", "Current UTC time", json!({"type": "object"}))
///     }
///
///     fn call(&self, _args: Arguments) -> FunctionFuture<'_> {
///         Box::pin(async move { Ok(chrono::Utc::now().to_rfc3339()) })
///     }
/// }
/// ```
pub trait Function: Send + Sync {
    fn definition(&self) -> FunctionDef;

    /// Run the function. `arguments` has already been checked against the
    /// definition's schema.
    fn call(&self, arguments: Arguments) -> FunctionFuture<'_>;

    fn name(&self) -> String {
        self.definition().name
    }
}

// ── FunctionRegistry ───────────────────────────────────────────────

/// The set of functions a session may call, keyed by name.
///
/// ```ignore
/// let registry = FunctionRegistry::new()
///     .with_timeout(Some(Duration::from_secs(30)))
///     .with_builtin_functions("/srv/notes")
///     .with_if(admin, AdminFunction::new());
/// ```
pub struct FunctionRegistry {
    functions: HashMap<String, Box<dyn Function>>,
    max_result_bytes: usize,
    timeout: Option<Duration>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .field("max_result_bytes", &self.max_result_bytes)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            timeout: None,
        }
    }

    /// Set the maximum result size in bytes before truncation.
    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }

    /// Bound every call's running time. `None` disables the timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a function. Replaces any existing function with the same name.
    pub fn register(&mut self, function: impl Function + 'static) {
        self.functions.insert(function.name(), Box::new(function));
    }

    /// Register a function (builder pattern).
    pub fn with(mut self, function: impl Function + 'static) -> Self {
        self.register(function);
        self
    }

    /// Register a function only when `condition` holds.
    pub fn with_if(self, condition: bool, function: impl Function + 'static) -> Self {
        if condition { self.with(function) } else { self }
    }

    pub fn resolve(&self, name: &str) -> Option<&dyn Function> {
        self.functions.get(name).map(|f| f.as_ref())
    }

    /// Definitions for the backend, sorted by name so requests are stable.
    pub fn definitions(&self) -> Vec<FunctionDef> {
        let mut defs: Vec<FunctionDef> = self.functions.values().map(|f| f.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Run `function`, applying the timeout and truncating the result.
    pub async fn invoke(
        &self,
        function: &dyn Function,
        arguments: Arguments,
    ) -> Result<String, FunctionError> {
        let name = function.name();
        let start = std::time::Instant::now();

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, function.call(arguments)).await {
                Ok(r) => r,
                Err(_) => {
                    info!(
                        "Function {name} timed out after {:.1}s",
                        start.elapsed().as_secs_f64()
                    );
                    return Err(FunctionError::Failed(format!(
                        "timed out after {:.0} seconds",
                        limit.as_secs_f64()
                    )));
                }
            },
            None => function.call(arguments).await,
        };

        let elapsed = start.elapsed();
        match &result {
            Ok(text) => {
                debug!(
                    "Function {name} completed in {:.0}ms ({} bytes)",
                    elapsed.as_secs_f64() * 1000.0,
                    text.len()
                );
                trace!("Function {name} result preview: {}", preview(text, 300));
            }
            Err(e) => debug!("Function {name} failed after {:.0}ms: {e}", elapsed.as_secs_f64() * 1000.0),
        }

        result.map(|text| truncate_result(text, self.max_result_bytes))
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── FnFunction ─────────────────────────────────────────────────────

type ErasedHandler = Box<
    dyn Fn(Arguments) -> Pin<Box<dyn Future<Output = Result<String, FunctionError>> + Send>>
        + Send
        + Sync,
>;

/// A closure-backed function with typed arguments.
///
/// The handler receives arguments of type `A`, deserialized from the decoded
/// argument object. Use a struct implementing [`Function`] directly when the
/// function needs state.
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct EchoArgs { text: String }
///
/// let echo = FnFunction::new(
///     FunctionDef::new("echo", "Repeat the text", json_schema_for::<EchoArgs>()),
///     |args: EchoArgs| async move { Ok(args.text) },
/// );
/// ```
pub struct FnFunction {
    def: FunctionDef,
    handler: ErasedHandler,
}

impl FnFunction {
    pub fn new<A, F, Fut>(def: FunctionDef, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        let erased = move |raw: Arguments| -> Pin<
            Box<dyn Future<Output = Result<String, FunctionError>> + Send>,
        > {
            let args: A = match serde_json::from_value(Value::Object(raw)) {
                Ok(a) => a,
                Err(e) => {
                    let reason = e.to_string();
                    return Box::pin(async move { Err(FunctionError::InvalidArguments(reason)) });
                }
            };
            let fut = handler(args);
            Box::pin(async move { fut.await.map_err(FunctionError::Failed) })
        };
        Self {
            def,
            handler: Box::new(erased),
        }
    }
}

impl Function for FnFunction {
    fn definition(&self) -> FunctionDef {
        self.def.clone()
    }

    fn call(&self, arguments: Arguments) -> FunctionFuture<'_> {
        (self.handler)(arguments)
    }
}

impl fmt::Debug for FnFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFunction")
            .field("name", &self.def.name)
            .finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Decode a raw argument payload into an object and check it against the
/// function's schema. An empty payload decodes as `{}`.
pub fn decode_arguments(def: &FunctionDef, raw: &str) -> Result<Arguments, String> {
    let value: Value = if raw.trim().is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {e}"))?
    };
    let Value::Object(arguments) = value else {
        return Err("arguments must be a JSON object".into());
    };

    // A function whose schema doesn't compile is called unchecked.
    if let Ok(validator) = jsonschema::validator_for(&def.parameters) {
        let object = Value::Object(arguments);
        let errors: Vec<String> = validator
            .iter_errors(&object)
            .map(|e| format!("{}: {e}", e.instance_path()))
            .collect();
        if !errors.is_empty() {
            return Err(errors.join("; "));
        }
        let Value::Object(arguments) = object else {
            return Err("arguments must be a JSON object".into());
        };
        return Ok(arguments);
    }
    Ok(arguments)
}

/// Log a function call at INFO level with a truncated preview of arguments.
pub fn log_function_call(name: &str, arguments: &str) {
    info!(
        "[function] {name}({}{})",
        preview(arguments, 120),
        if arguments.chars().count() > 120 { "..." } else { "" }
    );
    trace!("[function] {name} arguments: {arguments}");
}

fn preview(s: &str, chars: usize) -> String {
    s.chars().take(chars).collect()
}

/// Truncate a string to at most `max` bytes (on a char boundary), appending
/// a notice if trimmed.
pub fn truncate_result(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    let kept = s.get(..cut).unwrap_or_default();
    format!("{kept}...\n[truncated: {} bytes total]", s.len())
}
