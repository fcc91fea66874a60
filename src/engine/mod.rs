//! Session arena and the control/reporting API.
//!
//! The [`Engine`] owns one loop per session, keyed by id, plus the shared
//! event bus, anomaly detector, and intervention orchestrator. Every command
//! it accepts is forwarded to the target loop as a control signal; every
//! read goes through an immutable snapshot or an actor query.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use uuid::Uuid;

use crate::bus::{ControlSignal, EventBus};
use crate::config::EngineConfig;
use crate::detector::{AnomalyDetector, AnomalyRecord};
use crate::error::CadenceError;
use crate::intervention::{InterventionDecision, InterventionOrchestrator};
use crate::llm::LlmClient;
use crate::session::runner::{spawn_session, SessionDeps};
use crate::session::{AgentDirectory, MessageLog, SessionHandle, SessionId, SessionSnapshot};
use crate::tools::ToolRegistry;
use crate::types::{Message, ToolResult};

/// Builder for [`Engine`].
pub struct EngineBuilder {
    llm: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    agents: AgentDirectory,
    config: EngineConfig,
    bus: Option<EventBus>,
}

impl EngineBuilder {
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn agents(mut self, agents: AgentDirectory) -> Self {
        self.agents = agents;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing bus instead of creating one from the config.
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Validate the configuration and start the monitoring tasks.
    ///
    /// Must be called within a Tokio runtime.
    pub fn build(self) -> Result<Engine, CadenceError> {
        self.config.validate()?;
        let bus = self
            .bus
            .unwrap_or_else(|| EventBus::new(self.config.bus.clone()));

        let detector = self
            .config
            .detector
            .enabled
            .then(|| AnomalyDetector::spawn(bus.clone(), self.config.detector.clone()));
        let orchestrator = self.config.intervention.enabled.then(|| {
            InterventionOrchestrator::spawn(bus.clone(), self.config.intervention.clone())
        });

        Ok(Engine {
            deps: SessionDeps {
                bus: bus.clone(),
                llm: self.llm,
                tools: Arc::new(self.tools),
                agents: Arc::new(self.agents),
                config: self.config.session.clone(),
            },
            bus,
            config: self.config,
            sessions: RwLock::new(HashMap::new()),
            detector,
            orchestrator,
        })
    }
}

/// Multi-session agent engine.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use cadence::prelude::*;
///
/// # async fn example() -> cadence::error::Result<()> {
/// let engine = Engine::builder(Arc::new(ScriptedLlm::default())).build()?;
/// let session = engine.create_session();
/// engine.start(session, "Summarize the report")?;
/// let snapshot = engine
///     .wait_for(session, |s| s.turn_index >= 1, std::time::Duration::from_secs(30))
///     .await?;
/// println!("{:?}", snapshot.phase);
/// engine.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Engine {
    bus: EventBus,
    deps: SessionDeps,
    config: EngineConfig,
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    detector: Option<AnomalyDetector>,
    orchestrator: Option<InterventionOrchestrator>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("sessions", &self.session_ids().len())
            .field("detector", &self.detector.is_some())
            .field("orchestrator", &self.orchestrator.is_some())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn builder(llm: Arc<dyn LlmClient>) -> EngineBuilder {
        EngineBuilder {
            llm,
            tools: ToolRegistry::new(),
            agents: AgentDirectory::new(),
            config: EngineConfig::default(),
            bus: None,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // --- Arena ---

    /// Create an idle session with an in-memory log.
    pub fn create_session(&self) -> SessionId {
        let session_id = Uuid::new_v4();
        self.insert(session_id, None);
        session_id
    }

    /// Create an idle session backed by `log`.
    pub fn create_session_with_log(&self, log: Arc<dyn MessageLog>) -> SessionId {
        let session_id = Uuid::new_v4();
        self.insert(session_id, Some(log));
        session_id
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.read_sessions().keys().copied().collect()
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.read_sessions().contains_key(&session_id)
    }

    /// Stop a session if needed and remove it from the arena.
    pub async fn close_session(&self, session_id: SessionId) -> Result<(), CadenceError> {
        let handle = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session_id)
            .ok_or(CadenceError::SessionNotFound(session_id))?;
        handle.cancel();
        handle.join().await;
        Ok(())
    }

    // --- Control API ---

    /// Start a session with its first prompt, creating it if the id is new.
    pub fn start(
        &self,
        session_id: SessionId,
        prompt: impl Into<String>,
    ) -> Result<(), CadenceError> {
        self.start_inner(session_id, prompt.into(), None)
    }

    /// Like [`start`](Self::start), with an explicit starting agent.
    pub fn start_with_agent(
        &self,
        session_id: SessionId,
        prompt: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Result<(), CadenceError> {
        self.start_inner(session_id, prompt.into(), Some(agent_id.into()))
    }

    pub fn stop(&self, session_id: SessionId) -> Result<(), CadenceError> {
        self.control(session_id, ControlSignal::Stop)
    }

    pub fn pause(&self, session_id: SessionId) -> Result<(), CadenceError> {
        self.control(session_id, ControlSignal::Pause)
    }

    pub fn resume(&self, session_id: SessionId) -> Result<(), CadenceError> {
        self.control(session_id, ControlSignal::Resume)
    }

    pub fn send_user_message(
        &self,
        session_id: SessionId,
        text: impl Into<String>,
    ) -> Result<(), CadenceError> {
        self.control(session_id, ControlSignal::UserMessage { text: text.into() })
    }

    /// Answer a delegated tool call.
    pub fn provide_tool_result(
        &self,
        session_id: SessionId,
        result: ToolResult,
    ) -> Result<(), CadenceError> {
        self.control(
            session_id,
            ControlSignal::ProvideToolResult {
                tool_call_id: result.tool_call_id,
                result: result.result,
                is_error: result.is_error,
            },
        )
    }

    /// Inject a user-role message at the next turn boundary.
    pub fn inject(
        &self,
        session_id: SessionId,
        text: impl Into<String>,
    ) -> Result<(), CadenceError> {
        self.control(
            session_id,
            ControlSignal::InjectMessage {
                text: text.into(),
                intervention: false,
            },
        )
    }

    /// Parse and forward a JSON control signal such as `{"kind": "pause"}`.
    ///
    /// Unknown kinds are logged and dropped; the session is unaffected.
    pub fn send_raw(
        &self,
        session_id: SessionId,
        raw: serde_json::Value,
    ) -> Result<(), CadenceError> {
        let signal = match ControlSignal::from_value(raw) {
            Ok(signal) => signal,
            Err(err) => {
                tracing::warn!(session_id = %session_id, error = %err, "ignoring control signal");
                return Err(err);
            }
        };
        match signal {
            ControlSignal::Start { prompt, agent_id } => {
                self.start_inner(session_id, prompt, agent_id)
            }
            other => self.control(session_id, other),
        }
    }

    // --- Reporting ---

    pub fn snapshot(&self, session_id: SessionId) -> Result<SessionSnapshot, CadenceError> {
        self.with_handle(session_id, SessionHandle::snapshot)
    }

    pub fn messages(&self, session_id: SessionId) -> Result<Vec<Message>, CadenceError> {
        self.with_handle(session_id, SessionHandle::messages)
    }

    pub fn watch(
        &self,
        session_id: SessionId,
    ) -> Result<watch::Receiver<SessionSnapshot>, CadenceError> {
        self.with_handle(session_id, SessionHandle::watch)
    }

    /// Wait until the session's snapshot satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// [`CadenceError::Timeout`] when `timeout` elapses first, and
    /// [`CadenceError::InvalidState`] when the session ends without ever
    /// matching.
    pub async fn wait_for(
        &self,
        session_id: SessionId,
        predicate: impl Fn(&SessionSnapshot) -> bool,
        timeout: Duration,
    ) -> Result<SessionSnapshot, CadenceError> {
        let mut rx = self.watch(session_id)?;
        let waited = tokio::time::timeout(timeout, rx.wait_for(|s| predicate(s))).await;
        match waited {
            Ok(Ok(snapshot)) => Ok(snapshot.clone()),
            Ok(Err(_)) => Err(CadenceError::InvalidState(format!(
                "session {session_id} ended before the awaited state"
            ))),
            Err(_) => Err(CadenceError::Timeout(timeout.as_millis() as u64)),
        }
    }

    /// Retained anomaly records, oldest first.
    pub async fn recent_anomalies(&self, session_id: Option<SessionId>) -> Vec<AnomalyRecord> {
        match &self.detector {
            Some(detector) => detector.recent(session_id).await,
            None => Vec::new(),
        }
    }

    /// Intervention decisions, including suppressed ones, oldest first.
    pub async fn intervention_decisions(
        &self,
        session_id: Option<SessionId>,
    ) -> Vec<InterventionDecision> {
        match &self.orchestrator {
            Some(orchestrator) => orchestrator.decisions(session_id).await,
            None => Vec::new(),
        }
    }

    /// Stop every session and the monitoring tasks.
    pub async fn shutdown(&self) {
        let handles: Vec<SessionHandle> = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        tracing::info!(sessions = handles.len(), "engine shutting down");
        for handle in &handles {
            handle.cancel();
        }
        for handle in handles {
            handle.join().await;
        }
        if let Some(orchestrator) = &self.orchestrator {
            orchestrator.shutdown().await;
        }
        if let Some(detector) = &self.detector {
            detector.shutdown().await;
        }
    }

    /// Spawn a loop for `session_id` unless one is already registered.
    ///
    /// The lookup and the insert share one write guard, so concurrent callers
    /// never spawn a second loop for the same id.
    fn insert(&self, session_id: SessionId, log: Option<Arc<dyn MessageLog>>) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id)
            .or_insert_with(|| {
                tracing::debug!(session_id = %session_id, "session created");
                spawn_session(session_id, self.deps.clone(), log)
            });
    }

    fn start_inner(
        &self,
        session_id: SessionId,
        prompt: String,
        agent_id: Option<String>,
    ) -> Result<(), CadenceError> {
        self.insert(session_id, None);
        let phase = self.snapshot(session_id)?.phase;
        if phase != crate::session::SessionPhase::Idle {
            return Err(CadenceError::InvalidState(format!(
                "session {session_id} already started ({phase})"
            )));
        }
        self.bus
            .send(session_id, ControlSignal::Start { prompt, agent_id });
        Ok(())
    }

    /// Forward a signal to a live session.
    fn control(&self, session_id: SessionId, signal: ControlSignal) -> Result<(), CadenceError> {
        let phase = self.snapshot(session_id)?.phase;
        if phase.is_terminal() {
            return Err(CadenceError::InvalidState(format!(
                "session {session_id} has ended ({phase})"
            )));
        }
        self.bus.send(session_id, signal);
        Ok(())
    }

    fn with_handle<T>(
        &self,
        session_id: SessionId,
        f: impl FnOnce(&SessionHandle) -> T,
    ) -> Result<T, CadenceError> {
        self.read_sessions()
            .get(&session_id)
            .map(f)
            .ok_or(CadenceError::SessionNotFound(session_id))
    }

    fn read_sessions(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<SessionId, SessionHandle>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Topic;
    use crate::llm::ScriptedLlm;
    use crate::session::SessionPhase;

    fn engine() -> Engine {
        Engine::builder(Arc::new(ScriptedLlm::default()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn unknown_sessions_are_reported() {
        let engine = engine();
        let missing = Uuid::new_v4();
        assert!(matches!(
            engine.pause(missing),
            Err(CadenceError::SessionNotFound(id)) if id == missing
        ));
        assert!(matches!(
            engine.snapshot(missing),
            Err(CadenceError::SessionNotFound(_))
        ));
        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_starts_spawn_one_loop() {
        let engine = Arc::new(engine());
        let session = Uuid::new_v4();
        let barrier = Arc::new(tokio::sync::Barrier::new(8));

        let starts: Vec<_> = (0..8)
            .map(|i| {
                let engine = engine.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    let _ = engine.start(session, format!("hi {i}"));
                })
            })
            .collect();
        for start in starts {
            start.await.unwrap();
        }

        assert_eq!(engine.session_ids(), vec![session]);
        assert_eq!(engine.bus().subscriber_count(Topic::ControlStart), 1);
        engine.shutdown().await;
        assert_eq!(engine.bus().subscriber_count(Topic::ControlStart), 0);
    }

    #[tokio::test]
    async fn start_creates_missing_sessions() {
        let engine = engine();
        let session = Uuid::new_v4();
        engine.start(session, "hi").unwrap();
        assert!(engine.contains(session));

        let snapshot = engine
            .wait_for(session, |s| s.turn_index == 1, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(snapshot.phase, SessionPhase::Running);
        assert!(matches!(
            engine.start(session, "again"),
            Err(CadenceError::InvalidState(_))
        ));
        engine.shutdown().await;
        assert!(engine.session_ids().is_empty());
    }

    #[tokio::test]
    async fn raw_signals_with_unknown_kind_are_rejected() {
        let engine = engine();
        let session = engine.create_session();
        let err = engine
            .send_raw(session, serde_json::json!({ "kind": "rewind" }))
            .unwrap_err();
        assert!(matches!(err, CadenceError::UnknownControlSignal(_)));
        assert_eq!(engine.snapshot(session).unwrap().phase, SessionPhase::Idle);
        engine.shutdown().await;
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.session.max_autonomous_turns = 0;
        let result = Engine::builder(Arc::new(ScriptedLlm::default()))
            .config(config)
            .build();
        assert!(matches!(result, Err(CadenceError::Configuration(_))));
    }
}
