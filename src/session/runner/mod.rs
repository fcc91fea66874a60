//! Session execution loop.
//!
//! One spawned task per session drives the turn-taking state machine:
//!
//! ```text
//! Idle --start--> Running --tool calls--> AwaitingToolResult --results--> Running
//!                    |  ^                                                    |
//!              pause |  | resume                          terminate / limit: idle in Running
//!                    v  |
//!                   Paused          any non-terminal --stop--> Stopped
//!                                   any --unrecoverable--> Errored
//! ```
//!
//! The loop owns its [`SessionState`](super::state::SessionState); everything
//! outside reads [`SessionSnapshot`]s from a watch channel.

mod control;
mod engine;
mod limits;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::agents::AgentDirectory;
use super::log::{InMemoryMessageLog, MessageLog};
use super::state::{SessionId, SessionSnapshot};
use crate::bus::EventBus;
use crate::config::SessionConfig;
use crate::llm::LlmClient;
use crate::tools::ToolRegistry;
use crate::types::Message;

use control::{subscribe_control, SessionEmitter};
use engine::{SessionLoop, SessionLoopArgs};
use limits::RunnerLimits;

/// Collaborators shared by every session of an engine.
#[derive(Clone)]
pub(crate) struct SessionDeps {
    pub(crate) bus: EventBus,
    pub(crate) llm: Arc<dyn LlmClient>,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) agents: Arc<AgentDirectory>,
    pub(crate) config: SessionConfig,
}

/// Read access to a running session plus its cancellation handle.
pub struct SessionHandle {
    session_id: SessionId,
    snapshots: watch::Receiver<SessionSnapshot>,
    log: Arc<dyn MessageLog>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session_id)
            .field("phase", &self.snapshots.borrow().phase)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Latest published state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Copy of the conversation so far.
    pub fn messages(&self) -> Vec<Message> {
        self.log.read_all()
    }

    /// Whether the loop task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel every suspension point; the loop ends in `Stopped`.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) async fn join(self) {
        if let Err(err) = self.task.await {
            tracing::warn!(session_id = %self.session_id, error = %err, "session task failed");
        }
    }
}

/// Spawn the loop for a new session. It starts in `Idle` and waits for `start`.
pub(crate) fn spawn_session(
    session_id: SessionId,
    deps: SessionDeps,
    log: Option<Arc<dyn MessageLog>>,
) -> SessionHandle {
    let log = log.unwrap_or_else(|| Arc::new(InMemoryMessageLog::new()));
    let cancel = CancellationToken::new();
    let (control_token, inbox) = subscribe_control(&deps.bus, session_id, cancel.clone());
    let initial = SessionSnapshot::initial(session_id, &deps.config.default_agent);
    let (snapshot_tx, snapshots) = watch::channel(initial);

    let session = SessionLoop::new(SessionLoopArgs {
        session_id,
        emitter: SessionEmitter::new(session_id, deps.bus.clone()),
        log: log.clone(),
        llm: deps.llm,
        tools: deps.tools,
        agents: deps.agents,
        limits: RunnerLimits::from_config(&deps.config),
        default_agent: deps.config.default_agent,
        inbox,
        control_token,
        cancel: cancel.clone(),
        snapshots: snapshot_tx,
    });
    let task = tokio::spawn(session.run());

    SessionHandle {
        session_id,
        snapshots,
        log,
        cancel,
        task,
    }
}
