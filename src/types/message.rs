//! Conversation messages and tool calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Content substituted for an assistant turn that produced nothing.
pub const EMPTY_TURN_PLACEHOLDER: &str = "[no response]";

/// Conversation role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Who produced a message, beyond its role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    #[default]
    Conversation,
    /// Substituted for an empty assistant turn.
    Placeholder,
    /// Injected by the intervention orchestrator.
    Intervention,
    /// Synthetic handoff context.
    Handoff,
}

/// One turn's content. Immutable once appended to a session log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set only for `Role::Tool`; references the call it answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    /// Agent that produced an assistant message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub origin: MessageOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    fn with_role(role: Role) -> Self {
        Self {
            role,
            content: None,
            reasoning: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
            agent_id: None,
            origin: MessageOrigin::Conversation,
            timestamp: Some(Utc::now()),
        }
    }

    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::with_role(Role::System)
        }
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::with_role(Role::User)
        }
    }

    /// Create an assistant message from accumulated turn output.
    pub fn assistant(
        content: Option<String>,
        reasoning: Option<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            content,
            reasoning,
            tool_calls,
            ..Self::with_role(Role::Assistant)
        }
    }

    /// Placeholder assistant message standing in for an empty turn.
    pub fn placeholder() -> Self {
        Self {
            content: Some(EMPTY_TURN_PLACEHOLDER.to_string()),
            origin: MessageOrigin::Placeholder,
            ..Self::with_role(Role::Assistant)
        }
    }

    /// Create a tool result message answering `tool_call_id`.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        result: &serde_json::Value,
        is_error: bool,
    ) -> Self {
        let content = match result {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        Self {
            content: Some(content),
            tool_call_id: Some(tool_call_id.into()),
            is_error,
            ..Self::with_role(Role::Tool)
        }
    }

    /// User-role message injected by an intervention.
    pub fn intervention(text: impl Into<String>) -> Self {
        Self {
            origin: MessageOrigin::Intervention,
            ..Self::user(text)
        }
    }

    /// System-role message carrying a handoff context summary.
    pub fn handoff(from: &str, to: &str, summary: Option<&str>) -> Self {
        let mut text = format!("Conversation handed off from agent '{from}' to agent '{to}'.");
        if let Some(summary) = summary.filter(|s| !s.trim().is_empty()) {
            text.push_str("\nContext summary: ");
            text.push_str(summary);
        }
        Self {
            origin: MessageOrigin::Handoff,
            ..Self::system(text)
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn is_placeholder(&self) -> bool {
        self.origin == MessageOrigin::Placeholder
    }

    /// Text content, or an empty string.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// A tool invocation requested by the model.
///
/// Arguments arrive as raw text fragments and are parsed only once the call
/// is complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw argument text as streamed.
    pub arguments_fragment: String,
    /// Parsed arguments; `None` until complete, or when parsing failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
    pub complete: bool,
    /// Set when the arguments could not be interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments_fragment: String::new(),
            arguments: None,
            complete: false,
            error: None,
        }
    }

    /// A complete call with already-parsed arguments.
    pub fn completed(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            arguments_fragment: arguments.to_string(),
            arguments: Some(arguments),
            complete: true,
            ..Self::new(id, name)
        }
    }

    /// Parsed arguments, or `null` when unavailable.
    pub fn arguments_value(&self) -> serde_json::Value {
        self.arguments.clone().unwrap_or(serde_json::Value::Null)
    }

    pub fn is_malformed(&self) -> bool {
        self.error.is_some()
    }
}

/// A tool execution result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub result: serde_json::Value,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result,
            is_error: false,
        }
    }

    pub fn error(tool_call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result: serde_json::json!({ "error": message.into() }),
            is_error: true,
        }
    }

    pub fn into_message(self) -> Message {
        Message::tool_result(self.tool_call_id, &self.result, self.is_error)
    }
}
