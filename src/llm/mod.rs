//! LLM collaborator contract.
//!
//! The engine only needs a streaming `send`: any backend that turns an
//! [`LlmRequest`] into an ordered stream of [`StreamDelta`]s ending with a
//! finish reason is substitutable.

mod scripted;

pub use scripted::{Script, ScriptedLlm};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::CadenceError;
use crate::session::SessionId;
use crate::tools::ToolSchema;
use crate::types::{Message, StreamDelta};

/// Stream of deltas for one turn.
pub type DeltaStream = BoxStream<'static, Result<StreamDelta, CadenceError>>;

/// One outbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    pub session_id: SessionId,
    /// Agent whose configuration this request uses.
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Agent instructions; sent per request, never stored in the log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub stream: bool,
}

/// Streaming LLM backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Start a streamed response. Errors returned here, or yielded by the
    /// stream, count as transport failures when retryable.
    async fn send(&self, request: LlmRequest) -> Result<DeltaStream, CadenceError>;
}
