//! Context window management: token counting, budgets, eviction, archival.
//!
//! The backend accepts a bounded number of tokens per request, so the
//! sequence sent to it has to stay under budget:
//!
//! 1. **[`oracle`]**: [`TokenOracle`] counts tokens for a text, message, or
//!    sequence.
//! 2. **[`budget`]**: [`Budget`] derives the upper bound from the context
//!    length, the reply allowance, and a safety offset.
//! 3. **[`window`]**: [`ContextWindow`] admits messages and evicts the oldest
//!    non-system message until each new one fits.
//! 4. **[`archive`]**: evicted messages are handed to an optional
//!    [`Archive`] instead of being lost.

pub mod archive;
pub mod budget;
pub mod oracle;
pub mod window;

pub use archive::{Archive, ArchiveRecord, JsonlArchive};
pub use budget::{Budget, BudgetUsage};
pub use oracle::{
    DEFAULT_CHARS_PER_TOKEN, HeuristicOracle, TiktokenOracle, TokenOracle, WordOracle,
};
pub use window::{Admission, ContextWindow};
