//! Delta accumulator: merges streamed fragments into complete turn output.
//!
//! Text and reasoning fragments are echoed back immediately so callers can
//! display them with low latency. Tool-call fragments are concatenated as raw
//! text per declared index and only parsed once the turn terminates; partial
//! JSON is never inspected.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CadenceError;
use crate::types::{ContinuationDirective, FinishReason, Message, StreamDelta, ToolCall};

/// Incremental output produced by a single [`StreamDelta`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccumulationUpdate {
    /// Text fragment carried by the delta.
    pub text: Option<String>,
    /// Reasoning fragment carried by the delta.
    pub reasoning: Option<String>,
    /// Tool-call progress carried by the delta.
    pub tool_call: Option<ToolCallProgress>,
    /// Set on the delta that terminated the turn.
    pub finished: Option<TurnOutput>,
}

impl AccumulationUpdate {
    pub fn is_final(&self) -> bool {
        self.finished.is_some()
    }
}

/// Progress of one tool call within the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallProgress {
    pub index: usize,
    /// Call id, once the backend has declared it.
    pub id: Option<String>,
    /// Name accumulated so far.
    pub name: String,
    /// Argument text carried by this fragment.
    pub arguments_fragment: Option<String>,
    /// True for the fragment that opened the call.
    pub started: bool,
}

/// Accumulated output of a finished turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutput {
    pub content: Option<String>,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<FinishReason>,
    pub directive: Option<ContinuationDirective>,
    /// Error reported by the backend through the stream.
    pub error: Option<String>,
}

impl TurnOutput {
    /// No text, no reasoning and no tool calls.
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.reasoning.is_none() && self.tool_calls.is_empty()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Errors for calls whose arguments could not be interpreted.
    pub fn malformed_calls(&self) -> Vec<CadenceError> {
        self.tool_calls
            .iter()
            .filter_map(|call| {
                call.error.as_ref().map(|message| CadenceError::MalformedToolCall {
                    tool_call_id: call.id.clone(),
                    message: message.clone(),
                })
            })
            .collect()
    }

    /// Assistant message for this turn; a placeholder when the turn is empty.
    pub fn to_message(&self) -> Message {
        if self.is_empty() {
            return Message::placeholder();
        }
        Message::assistant(
            self.content.clone(),
            self.reasoning.clone(),
            self.tool_calls.clone(),
        )
    }
}

#[derive(Debug, Default)]
struct PendingCall {
    index: usize,
    id: Option<String>,
    name: String,
    arguments: String,
}

impl PendingCall {
    fn finalize(self) -> ToolCall {
        let id = self
            .id
            .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
        let mut call = ToolCall::new(id, self.name.trim());
        call.complete = true;

        if call.name.is_empty() {
            call.error = Some(format!("tool call at index {} has no name", self.index));
        }

        let raw = self.arguments.trim();
        if raw.is_empty() {
            call.arguments = Some(serde_json::json!({}));
        } else {
            match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(value) => call.arguments = Some(value),
                Err(err) if call.error.is_none() => {
                    call.error = Some(format!("arguments are not valid JSON: {err}"));
                }
                Err(_) => {}
            }
        }
        call.arguments_fragment = self.arguments;
        call
    }
}

/// Merges one turn's ordered [`StreamDelta`] sequence.
///
/// Create one accumulator per turn and feed it deltas in arrival order.
#[derive(Debug, Default)]
pub struct DeltaAccumulator {
    text: String,
    reasoning: String,
    calls: Vec<PendingCall>,
    slots: HashMap<usize, usize>,
    directive: Option<ContinuationDirective>,
    error: Option<String>,
    finished: bool,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a terminating delta (or stream end) has been processed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Reasoning accumulated so far.
    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    /// Merge one delta.
    pub fn accumulate(&mut self, delta: StreamDelta) -> AccumulationUpdate {
        if self.finished {
            tracing::warn!("delta received after turn finished; ignoring");
            return AccumulationUpdate::default();
        }

        let mut update = AccumulationUpdate::default();

        if let Some(fragment) = delta.text.filter(|t| !t.is_empty()) {
            self.text.push_str(&fragment);
            update.text = Some(fragment);
        }

        if let Some(fragment) = delta.reasoning.filter(|t| !t.is_empty()) {
            self.reasoning.push_str(&fragment);
            update.reasoning = Some(fragment);
        }

        if let Some(fragment) = delta.tool_call {
            let (slot, started) = match self.slots.get(&fragment.index) {
                Some(slot) => (*slot, false),
                None => {
                    self.calls.push(PendingCall {
                        index: fragment.index,
                        ..Default::default()
                    });
                    let slot = self.calls.len() - 1;
                    self.slots.insert(fragment.index, slot);
                    (slot, true)
                }
            };
            let call = &mut self.calls[slot];
            if let Some(id) = fragment.id.filter(|id| !id.trim().is_empty()) {
                call.id.get_or_insert(id);
            }
            if let Some(name) = fragment.name {
                call.name.push_str(&name);
            }
            if let Some(arguments) = &fragment.arguments {
                call.arguments.push_str(arguments);
            }
            update.tool_call = Some(ToolCallProgress {
                index: call.index,
                id: call.id.clone(),
                name: call.name.clone(),
                arguments_fragment: fragment.arguments,
                started,
            });
        }

        if delta.directive.is_some() {
            self.directive = delta.directive;
        }
        if delta.error.is_some() {
            self.error = delta.error;
        }

        if let Some(reason) = delta.finish_reason {
            update.finished = Some(self.finalize(Some(reason)));
        }

        update
    }

    /// Close the turn when the stream ended without a terminating delta.
    ///
    /// Returns `None` if the turn was already finished.
    pub fn finish(&mut self) -> Option<TurnOutput> {
        if self.finished {
            return None;
        }
        Some(self.finalize(None))
    }

    fn finalize(&mut self, finish_reason: Option<FinishReason>) -> TurnOutput {
        self.finished = true;
        self.slots.clear();
        let tool_calls: Vec<ToolCall> = std::mem::take(&mut self.calls)
            .into_iter()
            .map(PendingCall::finalize)
            .collect();
        let finish_reason = finish_reason.or_else(|| {
            if tool_calls.is_empty() {
                Some(FinishReason::Stop)
            } else {
                Some(FinishReason::ToolCalls)
            }
        });

        TurnOutput {
            content: non_empty(std::mem::take(&mut self.text)),
            reasoning: non_empty(std::mem::take(&mut self.reasoning)),
            tool_calls,
            finish_reason,
            directive: self.directive.take(),
            error: self.error.take(),
        }
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
