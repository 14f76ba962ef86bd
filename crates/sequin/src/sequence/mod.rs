//! Durable message sequences.
//!
//! - [`store`]: [`SequenceStore`], an ordered list persisted as a JSON array
//!   with atomic saves.
//! - [`transcript`]: [`Transcript`], the unbounded record of everything a
//!   session produced.

pub mod store;
pub mod transcript;

pub use store::SequenceStore;
pub use transcript::Transcript;
