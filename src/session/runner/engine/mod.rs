use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::control::SessionEmitter;
use super::limits::RunnerLimits;
use crate::accumulator::TurnOutput;
use crate::bus::{ControlSignal, EventPayload, SessionEndReason, SubscriptionToken, TurnOutcome};
use crate::channel::ChannelRouter;
use crate::error::CadenceError;
use crate::llm::{LlmClient, LlmRequest};
use crate::session::agents::{AgentDirectory, AgentProfile};
use crate::session::log::MessageLog;
use crate::session::state::{SessionId, SessionPhase, SessionSnapshot, SessionState};
use crate::tools::ToolRegistry;
use crate::types::{ContinuationDirective, Message, ToolCall, ToolResult};

mod llm_phase;
mod tool_phase;

use llm_phase::{run_llm_phase, LlmPhaseOutcome};
use tool_phase::{run_tool_phase, ToolPhaseOutcome};

pub(in crate::session::runner) struct SessionLoopArgs {
    pub(in crate::session::runner) session_id: SessionId,
    pub(in crate::session::runner) emitter: SessionEmitter,
    pub(in crate::session::runner) log: Arc<dyn MessageLog>,
    pub(in crate::session::runner) llm: Arc<dyn LlmClient>,
    pub(in crate::session::runner) tools: Arc<ToolRegistry>,
    pub(in crate::session::runner) agents: Arc<AgentDirectory>,
    pub(in crate::session::runner) limits: RunnerLimits,
    pub(in crate::session::runner) default_agent: String,
    pub(in crate::session::runner) inbox: mpsc::UnboundedReceiver<ControlSignal>,
    pub(in crate::session::runner) control_token: SubscriptionToken,
    pub(in crate::session::runner) cancel: CancellationToken,
    pub(in crate::session::runner) snapshots: watch::Sender<SessionSnapshot>,
}

enum LoopExit {
    Stopped,
    Failed(CadenceError),
}

enum TurnsOutcome {
    /// Control returned to the caller; the session stays in `Running`.
    Yield,
    Exit(LoopExit),
}

/// State and collaborators of one session loop.
pub(in crate::session::runner) struct SessionLoop {
    state: SessionState,
    emitter: SessionEmitter,
    log: Arc<dyn MessageLog>,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    agents: Arc<AgentDirectory>,
    profile: AgentProfile,
    limits: RunnerLimits,
    router: ChannelRouter,
    inbox: mpsc::UnboundedReceiver<ControlSignal>,
    control_token: SubscriptionToken,
    cancel: CancellationToken,
    snapshots: watch::Sender<SessionSnapshot>,
    paused: bool,
    /// External input is waiting for a response.
    has_work: bool,
}

impl SessionLoop {
    pub(in crate::session::runner) fn new(args: SessionLoopArgs) -> Self {
        let profile = args.agents.starting_profile(&args.default_agent);
        Self {
            state: SessionState::new(args.session_id, profile.id.clone()),
            emitter: args.emitter,
            log: args.log,
            llm: args.llm,
            tools: args.tools,
            agents: args.agents,
            profile,
            limits: args.limits,
            router: ChannelRouter::new(),
            inbox: args.inbox,
            control_token: args.control_token,
            cancel: args.cancel,
            snapshots: args.snapshots,
            paused: false,
            has_work: false,
        }
    }

    pub(in crate::session::runner) async fn run(mut self) {
        tracing::debug!(session_id = %self.state.session_id, "session loop start");
        match self.drive().await {
            LoopExit::Stopped => self.finish_stopped(),
            LoopExit::Failed(err) => self.finish_errored(err),
        }
        self.emitter.bus().unsubscribe(self.control_token);
    }

    async fn drive(&mut self) -> LoopExit {
        loop {
            if self.cancel.is_cancelled() {
                return LoopExit::Stopped;
            }
            if self.has_work && !self.paused && self.state.phase == SessionPhase::Running {
                match self.run_turns().await {
                    TurnsOutcome::Yield => continue,
                    TurnsOutcome::Exit(exit) => return exit,
                }
            }
            match self.next_signal().await {
                Some(signal) => self.apply_control(signal),
                None => return LoopExit::Stopped,
            }
        }
    }

    /// Wait for the next control signal; `None` once stopped.
    async fn next_signal(&mut self) -> Option<ControlSignal> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            signal = self.inbox.recv() => signal,
        }
    }

    /// Apply a control signal at a turn boundary.
    fn apply_control(&mut self, signal: ControlSignal) {
        let session_id = self.state.session_id;
        match signal {
            ControlSignal::Start { prompt, agent_id } => {
                if self.state.phase != SessionPhase::Idle {
                    tracing::warn!(
                        session_id = %session_id,
                        phase = ?self.state.phase,
                        "start ignored; session already started"
                    );
                    return;
                }
                if let Some(agent_id) = agent_id.filter(|id| !id.trim().is_empty()) {
                    self.profile = self.agents.starting_profile(agent_id.trim());
                    self.state.active_agent_id = self.profile.id.clone();
                }
                self.set_phase(SessionPhase::Running);
                self.emitter.emit(EventPayload::SessionStarted {
                    agent_id: self.state.active_agent_id.clone(),
                });
                self.accept_input(Message::user(prompt));
            }
            ControlSignal::UserMessage { text } => {
                if !self.accepts_input() {
                    tracing::warn!(
                        session_id = %session_id,
                        phase = ?self.state.phase,
                        "user message ignored"
                    );
                    return;
                }
                self.accept_input(Message::user(text));
            }
            ControlSignal::InjectMessage { text, intervention } => {
                if !self.accepts_input() {
                    tracing::warn!(
                        session_id = %session_id,
                        phase = ?self.state.phase,
                        "injected message ignored"
                    );
                    return;
                }
                let message = if intervention {
                    self.state.pending_interventions += 1;
                    Message::intervention(text)
                } else {
                    Message::user(text)
                };
                self.accept_input(message);
            }
            ControlSignal::Pause => {
                if self.state.phase == SessionPhase::Idle {
                    tracing::warn!(session_id = %session_id, "pause ignored; session not started");
                    return;
                }
                self.paused = true;
                if self.state.phase == SessionPhase::Running {
                    self.set_phase(SessionPhase::Paused);
                }
            }
            ControlSignal::Resume => {
                if !self.paused {
                    return;
                }
                self.paused = false;
                if self.state.phase == SessionPhase::Paused {
                    self.set_phase(SessionPhase::Running);
                }
            }
            ControlSignal::ProvideToolResult { tool_call_id, .. } => {
                tracing::warn!(
                    session_id = %session_id,
                    tool_call_id = %tool_call_id,
                    "no tool call is awaiting a result; ignoring"
                );
            }
            ControlSignal::Stop => {}
        }
    }

    fn accepts_input(&self) -> bool {
        !matches!(
            self.state.phase,
            SessionPhase::Idle | SessionPhase::Stopped | SessionPhase::Errored
        )
    }

    /// Append external input; it resets the autonomous-turn budget.
    fn accept_input(&mut self, message: Message) {
        if let Err(err) = self.append(message) {
            tracing::warn!(
                session_id = %self.state.session_id,
                error = %err,
                "failed to append input"
            );
            return;
        }
        self.state.autonomous_turns = 0;
        self.has_work = true;
        self.publish_snapshot();
    }

    /// Drain queued signals and hold while paused. `Err` means stopped.
    async fn pass_gate(&mut self) -> Result<(), LoopExit> {
        while let Ok(signal) = self.inbox.try_recv() {
            self.apply_control(signal);
        }
        while self.paused {
            match self.next_signal().await {
                Some(signal) => self.apply_control(signal),
                None => return Err(LoopExit::Stopped),
            }
        }
        if self.cancel.is_cancelled() {
            return Err(LoopExit::Stopped);
        }
        Ok(())
    }

    async fn run_turns(&mut self) -> TurnsOutcome {
        loop {
            if let Err(exit) = self.pass_gate().await {
                return TurnsOutcome::Exit(exit);
            }
            if !self.has_work {
                return TurnsOutcome::Yield;
            }
            if !self.limits.allows_autonomous_turn(self.state.autonomous_turns) {
                tracing::warn!(
                    session_id = %self.state.session_id,
                    autonomous_turns = self.state.autonomous_turns,
                    max = self.limits.max_autonomous_turns,
                    "autonomous turn limit reached; returning control"
                );
                self.emitter.emit(EventPayload::SessionError {
                    kind: "autonomy_limit".to_string(),
                    message: format!(
                        "stopped after {} consecutive autonomous turns",
                        self.limits.max_autonomous_turns
                    ),
                    retryable: false,
                });
                self.has_work = false;
                return TurnsOutcome::Yield;
            }

            let (output, latency) = match run_llm_phase(self).await {
                LlmPhaseOutcome::Ready { output, latency } => (output, latency),
                LlmPhaseOutcome::Canceled => return TurnsOutcome::Exit(LoopExit::Stopped),
                LlmPhaseOutcome::Failed(err) => return TurnsOutcome::Exit(LoopExit::Failed(err)),
            };

            if let Err(err) = self.complete_turn(&output, latency) {
                return TurnsOutcome::Exit(LoopExit::Failed(err));
            }

            let mut interrupted = false;
            if output.has_tool_calls() {
                match run_tool_phase(self, &output.tool_calls).await {
                    ToolPhaseOutcome::Completed => {}
                    ToolPhaseOutcome::Interrupted => interrupted = true,
                    ToolPhaseOutcome::Canceled => return TurnsOutcome::Exit(LoopExit::Stopped),
                    ToolPhaseOutcome::Failed(err) => {
                        return TurnsOutcome::Exit(LoopExit::Failed(err))
                    }
                }
            }

            let mut proceed = match &output.directive {
                Some(ContinuationDirective::Continue) => true,
                Some(ContinuationDirective::Terminate) => false,
                Some(ContinuationDirective::Handoff { agent_id, summary }) => {
                    match self.handoff(agent_id, summary.as_deref()) {
                        Ok(()) => true,
                        Err(err @ CadenceError::AgentNotFound(_)) => {
                            tracing::warn!(
                                session_id = %self.state.session_id,
                                error = %err,
                                "handoff rejected"
                            );
                            self.emitter.emit(EventPayload::session_error(&err));
                            false
                        }
                        Err(err) => return TurnsOutcome::Exit(LoopExit::Failed(err)),
                    }
                }
                None => output.has_tool_calls(),
            };

            if interrupted {
                // The injected message is fresh input and already reset the budget.
                proceed = true;
            } else if proceed {
                self.state.autonomous_turns += 1;
            }
            self.has_work = proceed;
            self.publish_snapshot();
        }
    }

    /// Append the turn's assistant message and publish its notifications.
    fn complete_turn(
        &mut self,
        output: &TurnOutput,
        latency: std::time::Duration,
    ) -> Result<(), CadenceError> {
        let session_id = self.state.session_id;
        self.append(output.to_message().with_agent(self.state.active_agent_id.clone()))?;
        self.state.turn_index += 1;
        self.state.pending_interventions = 0;

        for call in &output.tool_calls {
            if call.is_malformed() {
                continue;
            }
            self.emitter.emit(EventPayload::ToolCallIdentified {
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments_value(),
            });
        }
        for err in output.malformed_calls() {
            tracing::warn!(session_id = %session_id, error = %err, "malformed tool call");
            self.emitter.emit(EventPayload::session_error(&err));
        }

        let outcome = if matches!(output.directive, Some(ContinuationDirective::Handoff { .. })) {
            TurnOutcome::Handoff
        } else if output.is_empty() {
            TurnOutcome::Placeholder
        } else if output.has_tool_calls() {
            TurnOutcome::ToolCalls
        } else {
            TurnOutcome::Text
        };
        tracing::debug!(
            session_id = %session_id,
            turn_index = self.state.turn_index,
            tool_calls = output.tool_calls.len(),
            text_len = output.content.as_ref().map_or(0, String::len),
            outcome = %outcome,
            "turn complete"
        );
        self.emitter.emit(EventPayload::TurnCompleted {
            turn_index: self.state.turn_index,
            latency_ms: latency.as_millis() as u64,
            outcome,
        });
        self.publish_snapshot();
        Ok(())
    }

    /// Switch the active agent. The log is shared, never copied.
    fn handoff(&mut self, agent_id: &str, summary: Option<&str>) -> Result<(), CadenceError> {
        let profile = self.agents.resolve(agent_id)?.clone();
        let from = self.state.active_agent_id.clone();
        self.append(Message::handoff(&from, &profile.id, summary))?;
        tracing::info!(
            session_id = %self.state.session_id,
            from = %from,
            to = %profile.id,
            "agent handoff"
        );
        self.state.active_agent_id = profile.id.clone();
        self.emitter.emit(EventPayload::AgentHandoff {
            from,
            to: profile.id.clone(),
        });
        self.profile = profile;
        self.publish_snapshot();
        Ok(())
    }

    /// Append a tool result and publish it on the commentary channel.
    fn record_tool_result(
        &mut self,
        call: &ToolCall,
        result: ToolResult,
    ) -> Result<(), CadenceError> {
        let event = self.router.route_tool_result(call, &result);
        let is_error = result.is_error;
        self.append(result.into_message())?;
        self.emitter.emit(EventPayload::ChannelMessage(event));
        self.emitter.emit(EventPayload::ToolCallResult {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            is_error,
        });
        Ok(())
    }

    fn build_request(&self) -> LlmRequest {
        LlmRequest {
            session_id: self.state.session_id,
            agent_id: self.state.active_agent_id.clone(),
            model: self.profile.model.clone(),
            instructions: self.profile.instructions.clone(),
            messages: self.log.read_all(),
            tools: self.tools.schemas(self.profile.tools.as_deref()),
            stream: true,
        }
    }

    fn append(&mut self, message: Message) -> Result<(), CadenceError> {
        self.log.append(message)?;
        self.publish_snapshot();
        Ok(())
    }

    fn set_phase(&mut self, to: SessionPhase) {
        let from = self.state.phase;
        if from == to {
            return;
        }
        self.state.phase = to;
        tracing::info!(
            session_id = %self.state.session_id,
            from = %from,
            to = %to,
            "session phase changed"
        );
        self.emitter.emit(EventPayload::PhaseChanged { from, to });
        self.publish_snapshot();
    }

    fn publish_snapshot(&self) {
        self.snapshots
            .send_replace(self.state.snapshot(self.log.len()));
    }

    fn finish_stopped(&mut self) {
        if self.state.phase.is_terminal() {
            return;
        }
        self.set_phase(SessionPhase::Stopped);
        self.emitter.emit(EventPayload::SessionEnded {
            reason: SessionEndReason::Stopped,
            detail: None,
        });
    }

    fn finish_errored(&mut self, err: CadenceError) {
        tracing::warn!(session_id = %self.state.session_id, error = %err, "session failed");
        self.state.last_error = Some(err.to_string());
        self.emitter.emit(EventPayload::session_error(&err));
        self.set_phase(SessionPhase::Errored);
        self.emitter.emit(EventPayload::SessionEnded {
            reason: SessionEndReason::Error,
            detail: Some(err.to_string()),
        });
    }
}
