//! Session phase, loop-owned state, and the read-only snapshot observers see.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Identifies one session in the engine arena.
pub type SessionId = Uuid;

/// Lifecycle phase of a session loop.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Running,
    Paused,
    AwaitingToolResult,
    Stopped,
    Errored,
}

impl SessionPhase {
    /// No further turns will run.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Stopped | SessionPhase::Errored)
    }
}

/// Mutable session state. Owned and mutated only by the session loop.
#[derive(Debug, Clone)]
pub(crate) struct SessionState {
    pub(crate) session_id: SessionId,
    pub(crate) phase: SessionPhase,
    pub(crate) active_agent_id: String,
    /// Injected intervention messages not yet answered by a completed turn.
    pub(crate) pending_interventions: u32,
    pub(crate) turn_index: u64,
    /// Requests issued since the last external input.
    pub(crate) autonomous_turns: u32,
    pub(crate) last_error: Option<String>,
}

impl SessionState {
    pub(crate) fn new(session_id: SessionId, agent_id: impl Into<String>) -> Self {
        Self {
            session_id,
            phase: SessionPhase::Idle,
            active_agent_id: agent_id.into(),
            pending_interventions: 0,
            turn_index: 0,
            autonomous_turns: 0,
            last_error: None,
        }
    }

    pub(crate) fn snapshot(&self, message_count: usize) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            phase: self.phase,
            active_agent_id: self.active_agent_id.clone(),
            pending_interventions: self.pending_interventions,
            turn_index: self.turn_index,
            autonomous_turns: self.autonomous_turns,
            message_count,
            last_error: self.last_error.clone(),
            updated_at: Utc::now(),
        }
    }
}

/// Immutable copy of a session's state at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub phase: SessionPhase,
    pub active_agent_id: String,
    pub pending_interventions: u32,
    /// Completed turns.
    pub turn_index: u64,
    pub autonomous_turns: u32,
    pub message_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub(crate) fn initial(session_id: SessionId, agent_id: &str) -> Self {
        SessionState::new(session_id, agent_id).snapshot(0)
    }
}
