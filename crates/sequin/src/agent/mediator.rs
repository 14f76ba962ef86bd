//! Function-call round trips.
//!
//! When the backend replies with a function call instead of text, the
//! [`Mediator`] records the call, runs the named function, feeds the result
//! back as a function-role message, and asks for another reply. This repeats
//! until the backend answers with text or the chain limit is reached.
//!
//! ```text
//! Idle ──reply with call──▶ CallPending ──resolve+decode──▶ Executing
//!   ▲                                                          │
//!   └──── reply without call ◀── follow-up completion ◀── Result
//! ```
//!
//! Every failure ends the round back in Idle. The call message stays in the
//! session; no function-result message is recorded for a call that failed.

use crate::{FunctionCall, Message};
use crate::agent::session::Session;
use crate::api::provider::{DeltaSink, Provider};
use crate::context::window::Admission;
use crate::error::{FunctionError, MediatorError};
use crate::functions::core::{FunctionRegistry, decode_arguments, log_function_call};
use tracing::{debug, warn};

/// A function call that ran to completion during a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedCall {
    pub name: String,
    /// The raw argument payload as the backend sent it.
    pub arguments: String,
    /// The (possibly truncated) result fed back to the backend.
    pub result: String,
}

/// How a round ended when it ended well.
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    /// The final text reply.
    pub reply: Message,
    /// What the context window did with `reply`.
    pub admission: Admission,
    /// Calls executed on the way, in order.
    pub calls: Vec<ExecutedCall>,
}

/// Drives call → execute → result → reply for one session.
pub struct Mediator<'r> {
    registry: &'r FunctionRegistry,
    max_chain: usize,
}

impl<'r> Mediator<'r> {
    /// `max_chain` bounds the calls executed per round; `0` refuses every call.
    pub fn new(registry: &'r FunctionRegistry, max_chain: usize) -> Self {
        Self {
            registry,
            max_chain,
        }
    }

    pub fn max_chain(&self) -> usize {
        self.max_chain
    }

    /// Enqueue a user message, request a reply, and mediate it.
    pub async fn respond(
        &self,
        session: &mut Session,
        provider: &dyn Provider,
        user: Message,
        on_delta: DeltaSink<'_>,
    ) -> Result<RoundOutcome, MediatorError> {
        admit(session, user, "message")?;
        let reply = provider.complete(session.messages(), &mut *on_delta).await?;
        self.handle_reply(session, provider, reply, on_delta).await
    }

    /// Record `reply` and, while it asks for a function, run the round trip.
    pub async fn handle_reply(
        &self,
        session: &mut Session,
        provider: &dyn Provider,
        mut reply: Message,
        on_delta: DeltaSink<'_>,
    ) -> Result<RoundOutcome, MediatorError> {
        let mut calls: Vec<ExecutedCall> = Vec::new();

        loop {
            let Some(call) = reply.call().cloned() else {
                let admission = session.enqueue(reply.clone());
                if admission.is_rejected() {
                    warn!(
                        "Reply of {} tokens was not admitted to the context: {admission:?}",
                        admission.tokens()
                    );
                }
                return Ok(RoundOutcome {
                    reply,
                    admission,
                    calls,
                });
            };

            if calls.len() >= self.max_chain {
                session.enqueue(reply);
                warn!(
                    "Function call {} refused: chain limit of {} reached",
                    call.name, self.max_chain
                );
                return Err(MediatorError::ChainLimit {
                    limit: self.max_chain,
                });
            }

            admit(session, reply, "function call")?;

            let function = self
                .registry
                .resolve(&call.name)
                .ok_or_else(|| MediatorError::FunctionNotFound(call.name.clone()))?;
            log_function_call(&call.name, &call.arguments);

            let arguments = decode_arguments(&function.definition(), &call.arguments).map_err(
                |reason| MediatorError::Decode {
                    name: call.name.clone(),
                    reason,
                },
            )?;
            let result = self
                .registry
                .invoke(function, arguments)
                .await
                .map_err(|e| match e {
                    FunctionError::InvalidArguments(reason) => MediatorError::Decode {
                        name: call.name.clone(),
                        reason,
                    },
                    FunctionError::Failed(reason) => MediatorError::Execution {
                        name: call.name.clone(),
                        reason,
                    },
                })?;

            let admission = admit(
                session,
                Message::function_result(&call.name, &result),
                "function result",
            )?;
            if let Admission::Appended { evicted, .. } = admission
                && evicted > 0
                && !call_precedes_result(session.messages(), &call)
            {
                warn!(
                    "Result of {} evicted its own call from the context; the backend will see the result alone",
                    call.name
                );
            }
            debug!("Function {} returned {} bytes", call.name, result.len());
            calls.push(ExecutedCall {
                name: call.name,
                arguments: call.arguments,
                result,
            });

            reply = provider
                .complete(session.messages(), &mut *on_delta)
                .await?;
        }
    }
}

/// Enqueue `message`, turning a refusal into an error naming `what`.
fn admit(
    session: &mut Session,
    message: Message,
    what: &'static str,
) -> Result<Admission, MediatorError> {
    match session.enqueue(message) {
        Admission::Rejected {
            tokens,
            upper_bound,
        } => Err(MediatorError::Rejected {
            what,
            tokens,
            upper_bound,
        }),
        Admission::Unanchored { .. } => Err(MediatorError::Unanchored { what }),
        admission => Ok(admission),
    }
}

/// Whether the message just before the last one is the assistant turn
/// that made `call`.
fn call_precedes_result(messages: &[Message], call: &FunctionCall) -> bool {
    messages
        .iter()
        .rev()
        .nth(1)
        .and_then(Message::call)
        .is_some_and(|c| c == call)
}
