//! Streaming types.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Why a streamed response finished.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error,
}

/// Whether the loop proceeds autonomously after a turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContinuationDirective {
    Continue,
    Terminate,
    /// Transfer the conversation to another agent.
    Handoff {
        agent_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
}

/// A piece of a tool call, keyed by its position in the response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolCallFragment {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// One incremental unit of a streamed response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StreamDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallFragment>,
    /// Non-null only on the terminating delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directive: Option<ContinuationDirective>,
    /// Backend-reported error text (with `FinishReason::Error`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamDelta {
    pub fn text(fragment: impl Into<String>) -> Self {
        Self {
            text: Some(fragment.into()),
            ..Default::default()
        }
    }

    pub fn reasoning(fragment: impl Into<String>) -> Self {
        Self {
            reasoning: Some(fragment.into()),
            ..Default::default()
        }
    }

    /// Tool-call fragment that opens or names the call at `index`.
    pub fn tool_call_start(index: usize, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tool_call: Some(ToolCallFragment {
                index,
                id: Some(id.into()),
                name: Some(name.into()),
                arguments: None,
            }),
            ..Default::default()
        }
    }

    /// Tool-call fragment carrying only argument text.
    pub fn tool_call_arguments(index: usize, arguments: impl Into<String>) -> Self {
        Self {
            tool_call: Some(ToolCallFragment {
                index,
                arguments: Some(arguments.into()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn finish(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            finish_reason: Some(FinishReason::Error),
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_directive(mut self, directive: ContinuationDirective) -> Self {
        self.directive = Some(directive);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some()
    }
}
