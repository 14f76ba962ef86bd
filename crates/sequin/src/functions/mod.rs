//! Functions the backend can ask to have run.
//!
//! - [`core`]: the [`Function`] trait, [`FunctionRegistry`], [`FnFunction`]
//!   closure adapter, and argument decoding.
//! - [`builtin`]: `get_current_weather` and `read_file_chunk`.
//! - [`memory`]: per-session key-value memory and archive search.

pub mod builtin;
pub mod core;
pub mod memory;

pub use self::core::{
    Arguments, DEFAULT_MAX_RESULT_BYTES, FnFunction, Function, FunctionDef, FunctionFuture,
    FunctionRegistry, decode_arguments,
};
pub use builtin::{ReadFileChunk, weather};
pub use memory::{MemoryEntry, MemoryStore};
