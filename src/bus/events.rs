//! Event envelope, notification payloads, and control signals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use super::topic::Topic;
use crate::channel::ChannelEvent;
use crate::detector::{AnomalyKind, AnomalyRecord};
use crate::error::CadenceError;
use crate::intervention::InterventionReport;
use crate::session::{SessionId, SessionPhase};

/// Why a session ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionEndReason {
    Stopped,
    Error,
}

/// Shape of a completed turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TurnOutcome {
    Text,
    ToolCalls,
    Placeholder,
    Handoff,
}

/// Command directed at a session loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ControlSignal {
    Start {
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
    },
    Stop,
    Pause,
    Resume,
    InjectMessage {
        text: String,
        /// Set when the message originates from the intervention orchestrator.
        #[serde(default)]
        intervention: bool,
    },
    ProvideToolResult {
        tool_call_id: String,
        result: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    UserMessage {
        text: String,
    },
}

impl ControlSignal {
    pub fn topic(&self) -> Topic {
        match self {
            ControlSignal::Start { .. } => Topic::ControlStart,
            ControlSignal::Stop => Topic::ControlStop,
            ControlSignal::Pause => Topic::ControlPause,
            ControlSignal::Resume => Topic::ControlResume,
            ControlSignal::InjectMessage { .. } => Topic::ControlInjectMessage,
            ControlSignal::ProvideToolResult { .. } => Topic::ControlProvideToolResult,
            ControlSignal::UserMessage { .. } => Topic::ControlUserMessage,
        }
    }

    /// Parse a JSON control signal, e.g. `{"kind": "pause"}`.
    pub fn from_value(value: serde_json::Value) -> Result<Self, CadenceError> {
        let kind = value
            .get("kind")
            .and_then(|k| k.as_str())
            .map(str::to_string);
        serde_json::from_value(value).map_err(|err| {
            CadenceError::UnknownControlSignal(match kind {
                Some(kind) => format!("{kind}: {err}"),
                None => err.to_string(),
            })
        })
    }
}

/// Payload carried by a [`BusEvent`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    SessionStarted {
        agent_id: String,
    },
    SessionEnded {
        reason: SessionEndReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    PhaseChanged {
        from: SessionPhase,
        to: SessionPhase,
    },
    SessionError {
        kind: String,
        message: String,
        retryable: bool,
    },
    TurnCompleted {
        turn_index: u64,
        latency_ms: u64,
        outcome: TurnOutcome,
    },
    ChannelMessage(ChannelEvent),
    ToolCallIdentified {
        tool_call_id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolCallResult {
        tool_call_id: String,
        name: String,
        is_error: bool,
    },
    AgentHandoff {
        from: String,
        to: String,
    },
    AnomalyDetected(AnomalyRecord),
    InterventionApplied(InterventionReport),
    InterventionExhausted {
        kind: AnomalyKind,
        message: String,
    },
    Control(ControlSignal),
}

impl EventPayload {
    pub fn topic(&self) -> Topic {
        match self {
            EventPayload::SessionStarted { .. } => Topic::SessionStarted,
            EventPayload::SessionEnded { .. } => Topic::SessionEnded,
            EventPayload::PhaseChanged { .. } => Topic::PhaseChanged,
            EventPayload::SessionError { .. } => Topic::SessionError,
            EventPayload::TurnCompleted { .. } => Topic::TurnCompleted,
            EventPayload::ChannelMessage(_) => Topic::ChannelMessage,
            EventPayload::ToolCallIdentified { .. } => Topic::ToolCallIdentified,
            EventPayload::ToolCallResult { .. } => Topic::ToolCallResult,
            EventPayload::AgentHandoff { .. } => Topic::AgentHandoff,
            EventPayload::AnomalyDetected(_) => Topic::AnomalyDetected,
            EventPayload::InterventionApplied(_) => Topic::InterventionApplied,
            EventPayload::InterventionExhausted { .. } => Topic::InterventionExhausted,
            EventPayload::Control(signal) => signal.topic(),
        }
    }

    pub fn session_error(error: &CadenceError) -> Self {
        EventPayload::SessionError {
            kind: error.kind().to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

/// Envelope for every bus event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusEvent {
    /// Bus-wide publish sequence.
    pub seq: u64,
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl BusEvent {
    pub fn topic(&self) -> Topic {
        self.payload.topic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_signals_parse_from_camel_case_kinds() {
        let signal = ControlSignal::from_value(serde_json::json!({
            "kind": "provideToolResult",
            "tool_call_id": "call_1",
            "result": { "ok": true },
        }))
        .unwrap();
        assert_eq!(signal.topic(), Topic::ControlProvideToolResult);

        let pause = ControlSignal::from_value(serde_json::json!({ "kind": "pause" })).unwrap();
        assert_eq!(pause, ControlSignal::Pause);
    }

    #[test]
    fn unknown_control_kind_is_reported() {
        let err = ControlSignal::from_value(serde_json::json!({ "kind": "teleport" }))
            .unwrap_err();
        match err {
            CadenceError::UnknownControlSignal(message) => assert!(message.starts_with("teleport")),
            other => panic!("expected UnknownControlSignal, got {other:?}"),
        }
    }

    #[test]
    fn payload_topic_follows_control_kind() {
        let payload = EventPayload::Control(ControlSignal::Stop);
        assert_eq!(payload.topic(), Topic::ControlStop);
        assert!(payload.topic().is_control());
    }
}
