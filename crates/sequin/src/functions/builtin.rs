//! Built-in functions.
//!
//! | Function | Name | Description |
//! |----------|------|-------------|
//! | [`weather`] | `get_current_weather` | Mock weather report for a location |
//! | [`ReadFileChunk`] | `read_file_chunk` | Read a line range of a file under the workdir |

use crate::error::FunctionError;
use crate::functions::core::{
    Arguments, FnFunction, Function, FunctionDef, FunctionFuture, FunctionRegistry,
};
use crate::json_schema_for;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};

// ── Typed argument structs ──────────────────────────────────────────

/// Temperature unit.
#[derive(Deserialize, JsonSchema, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl std::fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemperatureUnit::Celsius => write!(f, "celsius"),
            TemperatureUnit::Fahrenheit => write!(f, "fahrenheit"),
        }
    }
}

/// Typed arguments for `get_current_weather`.
#[derive(Deserialize, JsonSchema)]
pub struct WeatherArgs {
    /// The city and state, e.g. San Francisco, CA.
    pub location: String,
    /// Temperature unit (default celsius).
    #[serde(default)]
    pub unit: Option<TemperatureUnit>,
}

/// Typed arguments for `read_file_chunk`.
#[derive(Deserialize, JsonSchema)]
pub struct ReadFileChunkArgs {
    /// File path relative to the working directory.
    pub path: String,
    /// First line to return, counting from 0.
    pub start_line: usize,
    /// Line to stop before. Reads to the end of the file when omitted.
    #[serde(default)]
    pub end_line: Option<usize>,
}

// ── get_current_weather ────────────────────────────────────────────

/// Mock weather report; always 20 degrees.
pub fn weather() -> FnFunction {
    FnFunction::new(
        FunctionDef::new(
            "get_current_weather",
            "Get the current weather in a given location",
            json_schema_for::<WeatherArgs>(),
        ),
        |args: WeatherArgs| async move {
            let unit = args.unit.unwrap_or_default();
            Ok(format!(
                "The current weather in {} is 20 degrees {unit}.",
                args.location
            ))
        },
    )
}

// ── read_file_chunk ────────────────────────────────────────────────

/// Read a range of lines from a file under a working directory.
///
/// Paths containing `..` or absolute paths are refused.
pub struct ReadFileChunk {
    workdir: PathBuf,
}

impl ReadFileChunk {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

impl Function for ReadFileChunk {
    fn definition(&self) -> FunctionDef {
        FunctionDef::new(
            "read_file_chunk",
            "Read lines [start_line, end_line) of a text file. Line numbers count from 0; \
             omit end_line to read to the end of the file.",
            json_schema_for::<ReadFileChunkArgs>(),
        )
    }

    fn call(&self, arguments: Arguments) -> FunctionFuture<'_> {
        Box::pin(async move {
            let args: ReadFileChunkArgs = serde_json::from_value(Value::Object(arguments))
                .map_err(|e| FunctionError::InvalidArguments(e.to_string()))?;
            if !is_contained(Path::new(&args.path)) {
                return Err(FunctionError::InvalidArguments(
                    "path traversal not allowed".into(),
                ));
            }
            if let Some(end) = args.end_line
                && end < args.start_line
            {
                return Err(FunctionError::InvalidArguments(format!(
                    "end_line ({end}) is before start_line ({})",
                    args.start_line
                )));
            }

            let full_path = self.workdir.join(&args.path);
            let content = tokio::fs::read_to_string(&full_path)
                .await
                .map_err(|e| FunctionError::Failed(format!("reading '{}': {e}", args.path)))?;

            let take = args
                .end_line
                .map_or(usize::MAX, |end| end - args.start_line);
            Ok(content
                .split_inclusive('\n')
                .skip(args.start_line)
                .take(take)
                .collect())
        })
    }
}

impl FunctionRegistry {
    /// Register `get_current_weather` and `read_file_chunk` (rooted at `workdir`).
    pub fn with_builtin_functions(self, workdir: impl Into<PathBuf>) -> Self {
        self.with(weather()).with(ReadFileChunk::new(workdir))
    }
}
