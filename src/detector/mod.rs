//! Anomaly detection over bus activity.
//!
//! The detector is an actor: it owns per-session trackers, consumes lifecycle
//! events from a bus mailbox plus a periodic tick, and publishes
//! [`AnomalyRecord`]s as `anomaly.detected`. It never touches session state.
//!
//! State-bearing topics arrive through a lossless mailbox. Channel traffic,
//! which can outpace the actor by orders of magnitude, has its own bounded
//! mailbox and only counts as activity.

mod classify;
mod tracker;

pub use classify::{confidence, Classifier};

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::bus::{EventBus, EventPayload, EventReceiver, SubscribeOptions, Topic};
use crate::config::DetectorConfig;
use crate::session::SessionId;

/// Topics whose every event changes what the classifier knows.
const STATE_TOPICS: [Topic; 8] = [
    Topic::SessionStarted,
    Topic::SessionEnded,
    Topic::PhaseChanged,
    Topic::SessionError,
    Topic::TurnCompleted,
    Topic::ToolCallIdentified,
    Topic::ToolCallResult,
    Topic::AgentHandoff,
];

/// Anomaly classification.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnomalyKind {
    Stall,
    ErrorBurst,
    PerformanceDegradation,
    ToolLoop,
}

/// Measurements behind a classification. Only the fields relevant to the
/// anomaly kind are set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_count: Option<u32>,
    /// Error kind, or `tool:<name>` for failing tool results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub samples_ms: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_mean_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_mean_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_count: Option<u32>,
    /// Threshold the measurement was compared against.
    pub threshold: f64,
}

/// One detected anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub session_id: SessionId,
    pub kind: AnomalyKind,
    /// In `[0.5, 1.0)`; grows with how far the threshold was exceeded.
    pub confidence: f64,
    pub evidence: Evidence,
    pub timestamp: DateTime<Utc>,
}

enum DetectorQuery {
    Recent {
        session: Option<SessionId>,
        reply: oneshot::Sender<Vec<AnomalyRecord>>,
    },
}

/// Handle to the running detector task.
#[derive(Debug)]
pub struct AnomalyDetector {
    queries: mpsc::Sender<DetectorQuery>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AnomalyDetector {
    /// Subscribe to session lifecycle and channel activity, then start the
    /// detector task.
    pub fn spawn(bus: EventBus, config: DetectorConfig) -> Self {
        let events = bus.subscribe_receiver(
            &STATE_TOPICS,
            SubscribeOptions::builder().lossless(true).build(),
        );
        let activity =
            bus.subscribe_receiver(&[Topic::ChannelMessage], SubscribeOptions::default());
        let (queries, inbox) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let actor = DetectorActor {
            bus,
            classifier: Classifier::new(config.clone()),
            ring: VecDeque::with_capacity(config.ring_capacity),
            ring_capacity: config.ring_capacity.max(1),
            tick_interval: config.tick_interval.max(Duration::from_millis(1)),
        };
        let task = tokio::spawn(actor.run(events, activity, inbox, cancel.clone()));
        Self {
            queries,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Retained records, oldest first, optionally for one session.
    pub async fn recent(&self, session: Option<SessionId>) -> Vec<AnomalyRecord> {
        let (reply, rx) = oneshot::channel();
        if self
            .queries
            .send(DetectorQuery::Recent { session, reply })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Stop the task and wait for it to exit.
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
            tracing::warn!(error = %err, "anomaly detector task failed");
        }
    }
}

struct DetectorActor {
    bus: EventBus,
    classifier: Classifier,
    ring: VecDeque<AnomalyRecord>,
    ring_capacity: usize,
    tick_interval: Duration,
}

impl DetectorActor {
    async fn run(
        mut self,
        mut events: EventReceiver,
        mut activity: EventReceiver,
        mut queries: mpsc::Receiver<DetectorQuery>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(query) = queries.recv() => self.answer(query),
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let records = self.classifier.observe(&event, Instant::now());
                    self.publish(records);
                }
                Some(event) = activity.recv() => {
                    self.classifier.note_activity(event.session_id, Instant::now());
                }
                _ = ticker.tick() => {
                    let records = self.classifier.tick(Instant::now());
                    self.publish(records);
                }
            }
        }
        tracing::debug!("anomaly detector stopped");
    }

    fn answer(&self, query: DetectorQuery) {
        match query {
            DetectorQuery::Recent { session, reply } => {
                let records = self
                    .ring
                    .iter()
                    .filter(|r| session.map_or(true, |id| r.session_id == id))
                    .cloned()
                    .collect();
                let _ = reply.send(records);
            }
        }
    }

    fn publish(&mut self, records: Vec<AnomalyRecord>) {
        for record in records {
            tracing::info!(
                session_id = %record.session_id,
                kind = %record.kind,
                confidence = record.confidence,
                "anomaly detected"
            );
            if self.ring.len() == self.ring_capacity {
                self.ring.pop_front();
            }
            self.ring.push_back(record.clone());
            self.bus
                .publish(record.session_id, EventPayload::AnomalyDetected(record));
        }
    }
}
