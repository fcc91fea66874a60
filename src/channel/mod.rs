//! Channel router: classifies accumulated output into presentation channels.
//!
//! Reasoning goes to [`Channel::Analysis`], tool-call lifecycle and tool
//! results to [`Channel::Commentary`], assistant text to [`Channel::Final`].
//! Every channel is always emitted; observers choose visibility when they
//! subscribe on the bus.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::accumulator::{AccumulationUpdate, TurnOutput};
use crate::types::{ToolCall, ToolResult, EMPTY_TURN_PLACEHOLDER};

/// Presentation channel.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Channel {
    Analysis,
    Commentary,
    Final,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Analysis, Channel::Commentary, Channel::Final];

    fn slot(self) -> usize {
        match self {
            Channel::Analysis => 0,
            Channel::Commentary => 1,
            Channel::Final => 2,
        }
    }
}

/// One routed piece of output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelEvent {
    pub channel: Channel,
    /// Fragment text for partial events; full text for the closing event.
    pub content: String,
    /// Monotonic per channel.
    pub sequence: u64,
    /// True until the owning turn finishes.
    pub is_partial: bool,
    /// Structured detail (tool call or result), when relevant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// Routes [`AccumulationUpdate`]s to channels with independent sequencing.
#[derive(Debug, Default)]
pub struct ChannelRouter {
    sequences: [u64; 3],
    open: [bool; 3],
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget which channels were opened by a previous (possibly abandoned) turn.
    pub fn begin_turn(&mut self) {
        self.open = [false; 3];
    }

    /// Last sequence number emitted on `channel` (0 if none).
    pub fn last_sequence(&self, channel: Channel) -> u64 {
        self.sequences[channel.slot()]
    }

    /// Route one update.
    ///
    /// Partial events come first, in field order (analysis, commentary, final).
    /// When the update finishes the turn, each channel opened during the turn
    /// plus the final channel receives exactly one closing event.
    pub fn route(&mut self, update: &AccumulationUpdate) -> Vec<ChannelEvent> {
        let mut events = Vec::new();

        if let Some(reasoning) = &update.reasoning {
            events.push(self.partial(Channel::Analysis, reasoning.clone(), None));
        }
        if let Some(progress) = &update.tool_call {
            let content = progress.arguments_fragment.clone().unwrap_or_default();
            let detail = serde_json::json!({
                "index": progress.index,
                "id": progress.id,
                "name": progress.name,
                "started": progress.started,
            });
            events.push(self.partial(Channel::Commentary, content, Some(detail)));
        }
        if let Some(text) = &update.text {
            events.push(self.partial(Channel::Final, text.clone(), None));
        }

        if let Some(output) = &update.finished {
            events.extend(self.close_turn(output));
        }

        events
    }

    /// Closing events for a finished turn.
    pub fn close_turn(&mut self, output: &TurnOutput) -> Vec<ChannelEvent> {
        let mut events = Vec::new();

        if self.open[Channel::Analysis.slot()] || output.reasoning.is_some() {
            let content = output.reasoning.clone().unwrap_or_default();
            events.push(self.closing(Channel::Analysis, content, None));
        }
        if self.open[Channel::Commentary.slot()] || output.has_tool_calls() {
            let content = summarize_calls(&output.tool_calls);
            let detail = serde_json::to_value(&output.tool_calls).ok();
            events.push(self.closing(Channel::Commentary, content, detail));
        }
        let content = if output.is_empty() {
            EMPTY_TURN_PLACEHOLDER.to_string()
        } else {
            output.content.clone().unwrap_or_default()
        };
        events.push(self.closing(Channel::Final, content, None));

        self.open = [false; 3];
        events
    }

    /// Commentary event for a tool execution result.
    pub fn route_tool_result(&mut self, call: &ToolCall, result: &ToolResult) -> ChannelEvent {
        let status = if result.is_error { "failed" } else { "completed" };
        let content = format!("{} {}", call.name, status);
        let detail = serde_json::json!({
            "tool_call_id": result.tool_call_id,
            "name": call.name,
            "result": result.result,
            "is_error": result.is_error,
        });
        self.next(Channel::Commentary, content, false, Some(detail))
    }

    fn partial(
        &mut self,
        channel: Channel,
        content: String,
        detail: Option<serde_json::Value>,
    ) -> ChannelEvent {
        self.open[channel.slot()] = true;
        self.next(channel, content, true, detail)
    }

    fn closing(
        &mut self,
        channel: Channel,
        content: String,
        detail: Option<serde_json::Value>,
    ) -> ChannelEvent {
        self.next(channel, content, false, detail)
    }

    fn next(
        &mut self,
        channel: Channel,
        content: String,
        is_partial: bool,
        detail: Option<serde_json::Value>,
    ) -> ChannelEvent {
        let slot = channel.slot();
        self.sequences[slot] += 1;
        ChannelEvent {
            channel,
            content,
            sequence: self.sequences[slot],
            is_partial,
            detail,
        }
    }
}

fn summarize_calls(calls: &[ToolCall]) -> String {
    calls
        .iter()
        .map(|call| match &call.error {
            Some(error) => format!("{} (malformed: {error})", call.name),
            None => call.name.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
