//! Automatic recovery driven by anomaly records.
//!
//! The orchestrator maps each anomaly to a strategy, applies it by sending
//! `injectMessage` back through the bus, and publishes what it did as
//! `intervention.applied`. Per-session rate limits, per-kind cool-downs, and
//! an escalation ladder keep it from oscillating.

mod policy;

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::bus::{ControlSignal, EventBus, EventPayload, EventReceiver, SubscribeOptions, Topic};
use crate::config::InterventionConfig;
use crate::detector::{AnomalyKind, AnomalyRecord};
use crate::session::SessionId;
use policy::{Action, InterventionPolicy};

/// Corrective action chosen for an anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InterventionStrategy {
    /// Inject a message asking the model to carry on.
    ContinuationNudge,
    /// Inject a message steering away from the failing tool or approach.
    AlternativeApproach,
    /// Publish a notification; the session is not touched.
    ReportOnly,
    /// Escalation: propose restarting the task from a clean plan.
    ProposeReset,
}

impl InterventionStrategy {
    pub fn for_anomaly(kind: AnomalyKind) -> Self {
        match kind {
            AnomalyKind::Stall => InterventionStrategy::ContinuationNudge,
            AnomalyKind::ErrorBurst | AnomalyKind::ToolLoop => {
                InterventionStrategy::AlternativeApproach
            }
            AnomalyKind::PerformanceDegradation => InterventionStrategy::ReportOnly,
        }
    }

    /// Whether applying this strategy sends a control signal.
    pub fn injects(self) -> bool {
        !matches!(self, InterventionStrategy::ReportOnly)
    }

    fn message(self, record: &AnomalyRecord) -> String {
        let evidence = &record.evidence;
        match (self, record.kind) {
            (InterventionStrategy::ContinuationNudge, _) => {
                "The session has been idle while waiting on tool results. Continue with the task: \
                 if a result is missing, proceed without it or explain what is blocking you."
                    .to_string()
            }
            (InterventionStrategy::AlternativeApproach, AnomalyKind::ToolLoop) => format!(
                "You have called '{}' with identical arguments {} times in a row. Stop repeating \
                 this call and try a different approach.",
                evidence.tool_name.as_deref().unwrap_or("the same tool"),
                evidence.repeat_count.unwrap_or_default(),
            ),
            (InterventionStrategy::AlternativeApproach, _) => format!(
                "The last steps failed repeatedly ({} x {}). Try a different tool or approach \
                 instead of retrying the failing step.",
                evidence.error_count.unwrap_or_default(),
                evidence.error_signature.as_deref().unwrap_or("error"),
            ),
            (InterventionStrategy::ReportOnly, _) => format!(
                "Response times degraded: recent mean {:.0}ms against a baseline of {:.0}ms.",
                evidence.recent_mean_ms.unwrap_or_default(),
                evidence.baseline_mean_ms.unwrap_or_default(),
            ),
            (InterventionStrategy::ProposeReset, _) => self.escalation_message(),
        }
    }

    fn escalation_message(self) -> String {
        "Earlier guidance did not change the session's progress. Summarize where things stand, \
         drop the approach that is not working, and restart the task from a clean plan."
            .to_string()
    }
}

/// What happened when a strategy was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InterventionOutcome {
    /// A message was injected into the session.
    Injected,
    /// Only a notification was published.
    Reported,
}

/// Payload of `intervention.applied`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionReport {
    pub anomaly_kind: AnomalyKind,
    pub strategy: InterventionStrategy,
    pub outcome: InterventionOutcome,
    /// Text injected or reported.
    pub message: String,
    /// 0 for the primary strategy, then one per escalation step.
    pub escalation_level: u32,
}

/// How the orchestrator disposed of an anomaly or follow-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DecisionStatus {
    Applied,
    RateLimited,
    CoolingDown,
    Exhausted,
}

/// Ledger entry for every decision, including suppressed ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionDecision {
    pub session_id: SessionId,
    pub anomaly_kind: AnomalyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<InterventionStrategy>,
    pub status: DecisionStatus,
    pub timestamp: DateTime<Utc>,
}

enum OrchestratorQuery {
    Decisions {
        session: Option<SessionId>,
        reply: oneshot::Sender<Vec<InterventionDecision>>,
    },
}

/// Handle to the running orchestrator task.
#[derive(Debug)]
pub struct InterventionOrchestrator {
    queries: mpsc::Sender<OrchestratorQuery>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl InterventionOrchestrator {
    pub fn spawn(bus: EventBus, config: InterventionConfig) -> Self {
        let events = bus.subscribe_receiver(
            &[Topic::AnomalyDetected, Topic::PhaseChanged, Topic::SessionEnded],
            SubscribeOptions::default(),
        );
        let (queries, inbox) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let actor = OrchestratorActor {
            bus,
            policy: InterventionPolicy::new(config),
        };
        let task = tokio::spawn(actor.run(events, inbox, cancel.clone()));
        Self {
            queries,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Decision ledger, oldest first, optionally for one session.
    pub async fn decisions(&self, session: Option<SessionId>) -> Vec<InterventionDecision> {
        let (reply, rx) = oneshot::channel();
        if self
            .queries
            .send(OrchestratorQuery::Decisions { session, reply })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(task) = task else {
            return;
        };
        if let Err(err) = task.await {
            tracing::warn!(error = %err, "intervention orchestrator task failed");
        }
    }
}

struct OrchestratorActor {
    bus: EventBus,
    policy: InterventionPolicy,
}

impl OrchestratorActor {
    async fn run(
        mut self,
        mut events: EventReceiver,
        mut queries: mpsc::Receiver<OrchestratorQuery>,
        cancel: CancellationToken,
    ) {
        loop {
            let deadline = self.policy.next_deadline();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(query) = queries.recv() => self.answer(query),
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let actions = match event.payload {
                        EventPayload::AnomalyDetected(record) => {
                            self.policy.on_anomaly(&record, Instant::now())
                        }
                        EventPayload::PhaseChanged { .. } => {
                            self.policy.on_phase_changed(event.session_id);
                            Vec::new()
                        }
                        EventPayload::SessionEnded { .. } => {
                            self.policy.on_session_ended(event.session_id);
                            Vec::new()
                        }
                        _ => Vec::new(),
                    };
                    self.execute(actions);
                }
                _ = wait_until(deadline) => {
                    let actions = self.policy.on_deadline(Instant::now());
                    self.execute(actions);
                }
            }
        }
        tracing::debug!("intervention orchestrator stopped");
    }

    fn answer(&self, query: OrchestratorQuery) {
        match query {
            OrchestratorQuery::Decisions { session, reply } => {
                let _ = reply.send(self.policy.decisions(session));
            }
        }
    }

    fn execute(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Inject { session_id, report } => {
                    tracing::info!(
                        session_id = %session_id,
                        kind = %report.anomaly_kind,
                        strategy = %report.strategy,
                        escalation_level = report.escalation_level,
                        "intervention applied"
                    );
                    self.bus.send(
                        session_id,
                        ControlSignal::InjectMessage {
                            text: report.message.clone(),
                            intervention: true,
                        },
                    );
                    self.bus
                        .publish(session_id, EventPayload::InterventionApplied(report));
                }
                Action::Report { session_id, report } => {
                    tracing::info!(
                        session_id = %session_id,
                        kind = %report.anomaly_kind,
                        "anomaly reported"
                    );
                    self.bus
                        .publish(session_id, EventPayload::InterventionApplied(report));
                }
                Action::Exhausted {
                    session_id,
                    kind,
                    message,
                } => {
                    self.bus.publish(
                        session_id,
                        EventPayload::InterventionExhausted { kind, message },
                    );
                }
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
