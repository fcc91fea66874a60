//! Bus topics.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Topic an event is published under.
///
/// Control topics are delivered synchronously and never dropped; every other
/// topic is buffered per subscriber.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum Topic {
    #[strum(serialize = "session.started")]
    #[serde(rename = "session.started")]
    SessionStarted,
    #[strum(serialize = "session.ended")]
    #[serde(rename = "session.ended")]
    SessionEnded,
    #[strum(serialize = "session.phase")]
    #[serde(rename = "session.phase")]
    PhaseChanged,
    #[strum(serialize = "session.error")]
    #[serde(rename = "session.error")]
    SessionError,
    #[strum(serialize = "turn.completed")]
    #[serde(rename = "turn.completed")]
    TurnCompleted,
    #[strum(serialize = "channel.message")]
    #[serde(rename = "channel.message")]
    ChannelMessage,
    #[strum(serialize = "toolCall.identified")]
    #[serde(rename = "toolCall.identified")]
    ToolCallIdentified,
    #[strum(serialize = "toolCall.result")]
    #[serde(rename = "toolCall.result")]
    ToolCallResult,
    #[strum(serialize = "agent.handoff")]
    #[serde(rename = "agent.handoff")]
    AgentHandoff,
    #[strum(serialize = "anomaly.detected")]
    #[serde(rename = "anomaly.detected")]
    AnomalyDetected,
    #[strum(serialize = "intervention.applied")]
    #[serde(rename = "intervention.applied")]
    InterventionApplied,
    #[strum(serialize = "intervention.exhausted")]
    #[serde(rename = "intervention.exhausted")]
    InterventionExhausted,
    #[strum(serialize = "control.start")]
    #[serde(rename = "control.start")]
    ControlStart,
    #[strum(serialize = "control.stop")]
    #[serde(rename = "control.stop")]
    ControlStop,
    #[strum(serialize = "control.pause")]
    #[serde(rename = "control.pause")]
    ControlPause,
    #[strum(serialize = "control.resume")]
    #[serde(rename = "control.resume")]
    ControlResume,
    #[strum(serialize = "control.injectMessage")]
    #[serde(rename = "control.injectMessage")]
    ControlInjectMessage,
    #[strum(serialize = "control.provideToolResult")]
    #[serde(rename = "control.provideToolResult")]
    ControlProvideToolResult,
    #[strum(serialize = "control.userMessage")]
    #[serde(rename = "control.userMessage")]
    ControlUserMessage,
}

impl Topic {
    pub fn is_control(self) -> bool {
        matches!(
            self,
            Topic::ControlStart
                | Topic::ControlStop
                | Topic::ControlPause
                | Topic::ControlResume
                | Topic::ControlInjectMessage
                | Topic::ControlProvideToolResult
                | Topic::ControlUserMessage
        )
    }

    /// Every control topic.
    pub fn control() -> Vec<Topic> {
        Topic::iter().filter(|t| t.is_control()).collect()
    }

    /// Every lifecycle (notification) topic.
    pub fn lifecycle() -> Vec<Topic> {
        Topic::iter().filter(|t| !t.is_control()).collect()
    }
}
