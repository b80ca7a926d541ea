//! Call termination: one task group and one outcome per call.
//!
//! A [`CallScope`] owns the two stage tasks of a call, a cancellation token
//! derived from the server's force-stop token, and the call's tracing span.
//! [`CallScope::finish`] joins the stages and settles the call:
//!
//! - The first stage to exit with an error decides the outcome. The scope then
//!   cancels the call token so the sibling stage unwinds; later exits are
//!   ignored. Stages never report through a channel, so none can block on a
//!   report nobody reads.
//! - If the transport drops the response stream (client disconnect), the call
//!   is settled as cancelled.
//! - The scope resolves only after both stages have exited.
//!
//! Dropping a scope (or aborting the task driving `finish`) aborts its stages.

use crate::server::telemetry::increment_call_errors;
use blobrelay_core::{Error, Result};
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{Instrument, Span};

/// How a call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// Clean end of input and every response was handed to the transport.
    Completed,
    /// The client went away or the call was cancelled. Not an RPC error.
    Cancelled,
    /// A stage failed; the error is sent to the client as the final status.
    Failed(Error),
}

pub struct CallScope {
    method: &'static str,
    token: CancellationToken,
    force: CancellationToken,
    span: Span,
    stages: JoinSet<Result<()>>,
}

impl CallScope {
    /// Opens a scope for one call. `force` is the server-wide force-stop
    /// token; cancelling it cancels this call.
    pub fn new(method: &'static str, force: &CancellationToken) -> Self {
        Self {
            method,
            token: force.child_token(),
            force: force.clone(),
            span: tracing::info_span!("call", method),
            stages: JoinSet::new(),
        }
    }

    /// Cancellation token shared by this call's stages.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Spawns a stage task inside the call's span.
    pub fn spawn<F>(&mut self, stage: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.stages.spawn(stage.instrument(self.span.clone()));
    }

    /// Joins every stage, settles the outcome and reports it to the client.
    ///
    /// A failure is sent as the final item of `responses`. Completion and
    /// cancellation simply end the stream once `responses` (and every other
    /// sender clone) is dropped.
    pub async fn finish<T>(self, responses: mpsc::Sender<Result<T, Status>>) -> CallOutcome {
        let span = self.span.clone();
        self.finish_inner(responses).instrument(span).await
    }

    async fn finish_inner<T>(self, responses: mpsc::Sender<Result<T, Status>>) -> CallOutcome {
        let Self {
            method,
            token,
            force,
            span: _,
            mut stages,
        } = self;
        let mut outcome: Option<CallOutcome> = None;

        loop {
            tokio::select! {
                joined = stages.join_next() => {
                    let Some(joined) = joined else { break };
                    let exit = match joined {
                        Ok(Ok(())) => continue,
                        Ok(Err(e)) if e.is_cancellation() => CallOutcome::Cancelled,
                        Ok(Err(e)) => CallOutcome::Failed(e),
                        Err(e) => CallOutcome::Failed(Error::ChannelError {
                            context: format!("stage task failed: {e}"),
                        }),
                    };
                    settle(&mut outcome, exit, &token);
                }
                () = responses.closed(), if outcome.is_none() => {
                    settle(&mut outcome, CallOutcome::Cancelled, &token);
                }
            }
        }

        let outcome = outcome.unwrap_or(CallOutcome::Completed);
        match &outcome {
            CallOutcome::Completed => tracing::debug!("Call completed"),
            CallOutcome::Cancelled if force.is_cancelled() => {
                tracing::warn!("Call abandoned by forced stop");
                // Best effort: the client may already be gone.
                let _ = responses.try_send(Err(Error::ServiceShutdown.into()));
            }
            CallOutcome::Cancelled => tracing::info!("Client cancelled call"),
            CallOutcome::Failed(e) => {
                tracing::error!(error = %e, "Call failed");
                increment_call_errors(method);
                tokio::select! {
                    _ = responses.send(Err(e.clone().into())) => {}
                    () = force.cancelled() => {}
                }
            }
        }
        outcome
    }
}

fn settle(slot: &mut Option<CallOutcome>, exit: CallOutcome, token: &CancellationToken) {
    if slot.is_none() {
        *slot = Some(exit);
        token.cancel();
    }
}
