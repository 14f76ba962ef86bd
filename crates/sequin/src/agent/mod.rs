//! Conversation runtime: sessions and the function-call mediator.
//!
//! - [`session::Session`]: a named bounded context plus unbounded
//!   transcript. Start here.
//! - [`session::SessionDirectory`]: where session files live; list and
//!   delete.
//! - [`mediator::Mediator`]: drives call → execute → result → reply.

pub mod mediator;
pub mod session;

pub use mediator::{ExecutedCall, Mediator, RoundOutcome};
pub use session::{Session, SessionDirectory, SessionStart};
