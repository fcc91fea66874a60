//! Deterministic [`LlmClient`] replaying queued scripts.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{DeltaStream, LlmClient, LlmRequest};
use crate::error::CadenceError;
use crate::types::{FinishReason, StreamDelta};

/// One scripted response.
#[derive(Debug, Clone)]
pub enum Script {
    /// Yield these deltas, then end the stream.
    Deltas(Vec<StreamDelta>),
    /// Yield each delta after its delay.
    Paced(Vec<(Duration, StreamDelta)>),
    /// Yield these deltas, then never yield again.
    DeltasThenHang(Vec<StreamDelta>),
    /// Fail `send` with a transport error.
    Fail(String),
    /// Yield these deltas, then a transport error.
    FailMidStream(Vec<StreamDelta>, String),
}

impl Script {
    /// Plain text answer.
    pub fn text(text: &str) -> Self {
        Script::Deltas(vec![
            StreamDelta::text(text),
            StreamDelta::finish(FinishReason::Stop),
        ])
    }

    /// Single tool call answer.
    pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> Self {
        Script::Deltas(vec![
            StreamDelta::tool_call_start(0, id, name),
            StreamDelta::tool_call_arguments(0, arguments.to_string()),
            StreamDelta::finish(FinishReason::ToolCalls),
        ])
    }

    /// Stream that opens and then never produces a delta.
    pub fn hang() -> Self {
        Script::DeltasThenHang(Vec::new())
    }
}

/// Replays [`Script`]s in order and records every request.
///
/// Once the queue is empty, every request receives the fallback script.
#[derive(Debug)]
pub struct ScriptedLlm {
    scripts: Mutex<VecDeque<Script>>,
    fallback: Script,
    requests: Mutex<Vec<LlmRequest>>,
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ScriptedLlm {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            fallback: Script::text("done"),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fallback(mut self, fallback: Script) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn push(&self, script: Script) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(script);
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn send(&self, request: LlmRequest) -> Result<DeltaStream, CadenceError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let stream: DeltaStream = match script {
            Script::Fail(message) => return Err(CadenceError::Transport(message)),
            Script::Deltas(deltas) => Box::pin(async_stream::stream! {
                for delta in deltas {
                    yield Ok::<_, CadenceError>(delta);
                }
            }),
            Script::Paced(deltas) => Box::pin(async_stream::stream! {
                for (delay, delta) in deltas {
                    tokio::time::sleep(delay).await;
                    yield Ok::<_, CadenceError>(delta);
                }
            }),
            Script::DeltasThenHang(deltas) => Box::pin(async_stream::stream! {
                for delta in deltas {
                    yield Ok::<_, CadenceError>(delta);
                }
                futures::future::pending::<()>().await;
            }),
            Script::FailMidStream(deltas, message) => Box::pin(async_stream::stream! {
                for delta in deltas {
                    yield Ok::<_, CadenceError>(delta);
                }
                yield Err(CadenceError::Transport(message));
            }),
        };
        Ok(stream)
    }
}
