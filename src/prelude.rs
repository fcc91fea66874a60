//! Convenience re-exports for common use.

pub use crate::bus::{BusEvent, ControlSignal, EventBus, EventPayload, SubscribeOptions, Topic};
pub use crate::config::{EngineConfig, SessionConfig, ToolExecutionMode};
pub use crate::detector::{AnomalyKind, AnomalyRecord};
pub use crate::engine::{Engine, EngineBuilder};
pub use crate::error::{CadenceError, Result};
pub use crate::intervention::{InterventionDecision, InterventionStrategy};
pub use crate::llm::{LlmClient, LlmRequest, ScriptedLlm};
pub use crate::session::{AgentDirectory, AgentProfile, SessionId, SessionPhase, SessionSnapshot};
pub use crate::tools::{FnTool, Tool, ToolArguments, ToolRegistry};
pub use crate::types::{Message, Role, ToolCall, ToolResult};
