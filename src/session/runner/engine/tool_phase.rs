use super::SessionLoop;
use crate::bus::ControlSignal;
use crate::config::ToolExecutionMode;
use crate::error::CadenceError;
use crate::session::state::SessionPhase;
use crate::tools::ToolExecutionContext;
use crate::types::{ToolCall, ToolResult};

/// Error text recorded for calls abandoned when an injected message arrives.
const NO_RESULT_RECEIVED: &str = "no result received";

pub(super) enum ToolPhaseOutcome {
    /// Every call has a result in the log.
    Completed,
    /// An injected message resolved the outstanding calls.
    Interrupted,
    Canceled,
    Failed(CadenceError),
}

pub(super) async fn run_tool_phase(
    session: &mut SessionLoop,
    tool_calls: &[ToolCall],
) -> ToolPhaseOutcome {
    session.set_phase(SessionPhase::AwaitingToolResult);

    let outcome = match session.limits.tool_mode {
        ToolExecutionMode::Direct => execute_direct(session, tool_calls).await,
        ToolExecutionMode::Delegated => await_delegated(session, tool_calls).await,
    };

    if matches!(
        outcome,
        ToolPhaseOutcome::Completed | ToolPhaseOutcome::Interrupted
    ) {
        session.set_phase(if session.paused {
            SessionPhase::Paused
        } else {
            SessionPhase::Running
        });
    }
    outcome
}

async fn execute_direct(session: &mut SessionLoop, tool_calls: &[ToolCall]) -> ToolPhaseOutcome {
    for call in tool_calls {
        let ctx = ToolExecutionContext {
            session_id: session.state.session_id,
            tool_call_id: call.id.clone(),
            agent_id: session.state.active_agent_id.clone(),
            cancel: session.cancel.child_token(),
        };
        let output = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => return ToolPhaseOutcome::Canceled,
            output = session.tools.execute(call, &ctx, session.profile.tools.as_deref()) => output,
        };
        if let Err(err) = session.record_tool_result(call, output.into_result(call.id.clone())) {
            return ToolPhaseOutcome::Failed(err);
        }
    }
    ToolPhaseOutcome::Completed
}

/// Wait for `provideToolResult` for every well-formed call.
///
/// Malformed calls are answered right away with their parse error. User
/// messages arriving meanwhile are held until the results are in.
async fn await_delegated(session: &mut SessionLoop, tool_calls: &[ToolCall]) -> ToolPhaseOutcome {
    let mut pending: Vec<ToolCall> = Vec::new();
    for call in tool_calls {
        match &call.error {
            Some(error) => {
                let result = ToolResult::error(&call.id, format!("malformed tool call: {error}"));
                if let Err(err) = session.record_tool_result(call, result) {
                    return ToolPhaseOutcome::Failed(err);
                }
            }
            None => pending.push(call.clone()),
        }
    }

    let mut deferred: Vec<ControlSignal> = Vec::new();
    let mut outcome = ToolPhaseOutcome::Completed;

    while !pending.is_empty() {
        let Some(signal) = session.next_signal().await else {
            return ToolPhaseOutcome::Canceled;
        };
        match signal {
            ControlSignal::ProvideToolResult {
                tool_call_id,
                result,
                is_error,
            } => {
                let Some(pos) = pending.iter().position(|call| call.id == tool_call_id) else {
                    tracing::warn!(
                        session_id = %session.state.session_id,
                        tool_call_id = %tool_call_id,
                        "result for unknown or already answered tool call; ignoring"
                    );
                    continue;
                };
                let call = pending.remove(pos);
                let result = ToolResult {
                    tool_call_id,
                    result,
                    is_error,
                };
                if let Err(err) = session.record_tool_result(&call, result) {
                    return ToolPhaseOutcome::Failed(err);
                }
            }
            inject @ ControlSignal::InjectMessage { .. } => {
                for call in pending.drain(..) {
                    let result = ToolResult::error(&call.id, NO_RESULT_RECEIVED);
                    if let Err(err) = session.record_tool_result(&call, result) {
                        return ToolPhaseOutcome::Failed(err);
                    }
                }
                session.apply_control(inject);
                outcome = ToolPhaseOutcome::Interrupted;
            }
            signal @ (ControlSignal::UserMessage { .. } | ControlSignal::Start { .. }) => {
                deferred.push(signal)
            }
            other => session.apply_control(other),
        }
    }

    for signal in deferred {
        session.apply_control(signal);
    }
    outcome
}
