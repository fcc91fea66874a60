//! Shared engine fixtures.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use cadence::config::{EngineConfig, SessionConfig, ToolExecutionMode};
use cadence::engine::Engine;
use cadence::llm::ScriptedLlm;
use cadence::session::{SessionId, SessionSnapshot};
use cadence::tools::{FnTool, ToolParameters, ToolRegistry};
use cadence::util::retry::RetryPolicy;

pub const WAIT: Duration = Duration::from_secs(600);

/// Retry quickly and deterministically.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        multiplier: 2.0,
        jitter: false,
    }
}

pub fn session_config(mode: ToolExecutionMode) -> SessionConfig {
    SessionConfig::builder()
        .tool_mode(mode)
        .retry(fast_retry(3))
        .build()
}

/// Registry with an `echo` tool returning `{"echo": <text>}`.
pub fn echo_tools() -> ToolRegistry {
    ToolRegistry::new().with(FnTool::new(
        "echo",
        "Echo the text back",
        ToolParameters::object().string("text", "Text", true).build(),
        |args, _ctx| async move {
            let text = args.get_str("text")?.to_string();
            Ok(serde_json::json!({ "echo": text }))
        },
    ))
}

pub fn engine_with(llm: Arc<ScriptedLlm>, config: EngineConfig) -> Engine {
    Engine::builder(llm)
        .tools(echo_tools())
        .config(config)
        .build()
        .expect("valid engine config")
}

pub async fn wait_for(
    engine: &Engine,
    session: SessionId,
    predicate: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    engine
        .wait_for(session, predicate, WAIT)
        .await
        .expect("session reached the awaited state")
}

/// Poll `condition` on a 10ms cadence until it holds.
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition held before the deadline");
}
