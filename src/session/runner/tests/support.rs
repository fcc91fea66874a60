use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use super::super::{spawn_session, SessionDeps, SessionHandle};
use crate::bus::{ControlSignal, EventBus, EventPayload, EventReceiver, SubscribeOptions, Topic};
use crate::config::{SessionConfig, ToolExecutionMode};
use crate::llm::ScriptedLlm;
use crate::session::{AgentDirectory, SessionSnapshot};
use crate::tools::{FnTool, ToolParameters, ToolRegistry};
use crate::util::retry::RetryPolicy;

/// Retry policy without jitter and with millisecond backoff.
pub(super) fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        multiplier: 2.0,
        jitter: false,
    }
}

pub(super) fn echo_tools() -> ToolRegistry {
    ToolRegistry::new().with(FnTool::new(
        "echo",
        "Echo the given text",
        ToolParameters::object()
            .string("text", "text to echo", true)
            .build(),
        |args, _ctx| async move {
            let text = args.get_str("text")?.to_string();
            Ok(json!({ "echo": text }))
        },
    ))
}

pub(super) struct HarnessBuilder {
    llm: ScriptedLlm,
    tools: ToolRegistry,
    agents: AgentDirectory,
    config: SessionConfig,
}

impl HarnessBuilder {
    pub(super) fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub(super) fn agents(mut self, agents: AgentDirectory) -> Self {
        self.agents = agents;
        self
    }

    pub(super) fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub(super) fn tool_mode(mut self, mode: ToolExecutionMode) -> Self {
        self.config.tool_mode = mode;
        self
    }

    pub(super) fn max_autonomous_turns(mut self, max: u32) -> Self {
        self.config.max_autonomous_turns = max;
        self
    }

    pub(super) fn stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.stream_idle_timeout = timeout;
        self
    }

    pub(super) fn build(self) -> Harness {
        let bus = EventBus::default();
        let session_id = Uuid::new_v4();
        let events =
            bus.subscribe_receiver(&Topic::lifecycle(), SubscribeOptions::for_session(session_id));
        let llm = Arc::new(self.llm);
        let deps = SessionDeps {
            bus: bus.clone(),
            llm: llm.clone(),
            tools: Arc::new(self.tools),
            agents: Arc::new(self.agents),
            config: self.config,
        };
        let handle = spawn_session(session_id, deps, None);
        Harness {
            bus,
            llm,
            handle,
            events: std::sync::Mutex::new(events),
        }
    }
}

/// One spawned session plus the bus and scripted model around it.
pub(super) struct Harness {
    pub(super) bus: EventBus,
    pub(super) llm: Arc<ScriptedLlm>,
    pub(super) handle: SessionHandle,
    events: std::sync::Mutex<EventReceiver>,
}

impl Harness {
    pub(super) fn new(llm: ScriptedLlm) -> Self {
        Self::builder(llm).build()
    }

    pub(super) fn builder(llm: ScriptedLlm) -> HarnessBuilder {
        HarnessBuilder {
            llm,
            tools: ToolRegistry::new(),
            agents: AgentDirectory::new(),
            config: SessionConfig::builder().retry(fast_retry(3)).build(),
        }
    }

    pub(super) fn send(&self, signal: ControlSignal) {
        self.bus.send(self.handle.session_id(), signal);
    }

    pub(super) fn start(&self, prompt: &str) {
        self.send(ControlSignal::Start {
            prompt: prompt.to_string(),
            agent_id: None,
        });
    }

    /// Wait for a published snapshot matching `predicate`.
    pub(super) async fn wait_until(
        &self,
        predicate: impl Fn(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let mut rx = self.handle.watch();
        let snapshot = tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| predicate(s)))
            .await
            .expect("timed out waiting for session state")
            .expect("session loop dropped its state channel");
        snapshot.clone()
    }

    /// Poll `condition` while letting the runtime make progress.
    pub(super) async fn until(&self, condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(30), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("timed out waiting for condition");
    }

    /// Let every spawned task run until it blocks.
    pub(super) async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    /// Lifecycle events published for this session so far.
    pub(super) fn events(&self) -> Vec<EventPayload> {
        let mut rx = self.events.lock().unwrap();
        let mut events = Vec::new();
        while let Some(event) = rx.try_recv() {
            events.push(event.payload);
        }
        events
    }
}
