//! Error types for Cadence.

use thiserror::Error;
use uuid::Uuid;

use crate::detector::AnomalyKind;

/// Primary error type for all Cadence operations.
#[derive(Error, Debug)]
pub enum CadenceError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Malformed tool call {tool_call_id}: {message}")]
    MalformedToolCall {
        tool_call_id: String,
        message: String,
    },

    #[error("Unknown control signal: {0}")]
    UnknownControlSignal(String),

    #[error("Automatic interventions exhausted for session {session_id} ({kind})")]
    InterventionExhausted { session_id: Uuid, kind: AnomalyKind },

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Broad classification used for retry and reporting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transport,
    Timeout,
    ToolCall,
    Control,
    Intervention,
    Configuration,
    State,
    Cancelled,
    Unknown,
}

impl CadenceError {
    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transport(_) => ErrorCategory::Transport,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::MalformedToolCall { .. }
            | Self::ToolExecution { .. }
            | Self::ToolNotFound(_)
            | Self::InvalidArgument(_) => ErrorCategory::ToolCall,
            Self::UnknownControlSignal(_) => ErrorCategory::Control,
            Self::InterventionExhausted { .. } => ErrorCategory::Intervention,
            Self::Configuration(_) | Self::ConfigParse(_) => ErrorCategory::Configuration,
            Self::InvalidState(_) | Self::SessionNotFound(_) | Self::AgentNotFound(_) => {
                ErrorCategory::State
            }
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Serialization(_) | Self::Io(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transport | ErrorCategory::Timeout
        )
    }

    /// Short machine-readable kind, used in `session.error` notifications.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) | Self::Timeout(_) => "transport_error",
            Self::MalformedToolCall { .. } => "malformed_tool_call",
            Self::UnknownControlSignal(_) => "unknown_control_signal",
            Self::InterventionExhausted { .. } => "intervention_exhausted",
            Self::ToolExecution { .. } => "tool_execution",
            Self::ToolNotFound(_) => "tool_not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::InvalidState(_) => "invalid_state",
            Self::SessionNotFound(_) => "session_not_found",
            Self::AgentNotFound(_) => "agent_not_found",
            Self::Cancelled => "cancelled",
            Self::Configuration(_) | Self::ConfigParse(_) => "configuration",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, CadenceError>;
