use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use tokio::time::Instant;

use super::{
    DecisionStatus, InterventionDecision, InterventionOutcome, InterventionReport,
    InterventionStrategy,
};
use crate::config::InterventionConfig;
use crate::detector::{AnomalyKind, AnomalyRecord};
use crate::error::CadenceError;
use crate::session::SessionId;

/// Decisions retained for reporting.
const LEDGER_CAPACITY: usize = 256;

/// Ended sessions remembered so late anomalies can be dropped.
const ENDED_CAPACITY: usize = 256;

/// Side effect the actor carries out for a decision.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Action {
    /// Send `injectMessage` to the session, then publish the report.
    Inject {
        session_id: SessionId,
        report: InterventionReport,
    },
    /// Publish the report only.
    Report {
        session_id: SessionId,
        report: InterventionReport,
    },
    Exhausted {
        session_id: SessionId,
        kind: AnomalyKind,
        message: String,
    },
}

#[derive(Debug)]
struct FollowUp {
    level: u32,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct SessionLedger {
    applied: VecDeque<Instant>,
    last_by_kind: HashMap<AnomalyKind, Instant>,
    follow_ups: HashMap<AnomalyKind, FollowUp>,
}

/// Rate limiting, cool-down, and escalation, independent of the runtime.
#[derive(Debug)]
pub struct InterventionPolicy {
    config: InterventionConfig,
    sessions: HashMap<SessionId, SessionLedger>,
    decisions: VecDeque<InterventionDecision>,
    ended: VecDeque<SessionId>,
}

impl InterventionPolicy {
    pub fn new(config: InterventionConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
            decisions: VecDeque::new(),
            ended: VecDeque::new(),
        }
    }

    /// Recorded decisions, oldest first.
    pub fn decisions(&self, session: Option<SessionId>) -> Vec<InterventionDecision> {
        self.decisions
            .iter()
            .filter(|d| session.map_or(true, |id| d.session_id == id))
            .cloned()
            .collect()
    }

    pub(super) fn on_anomaly(&mut self, record: &AnomalyRecord, now: Instant) -> Vec<Action> {
        let strategy = InterventionStrategy::for_anomaly(record.kind);
        let session_id = record.session_id;
        if self.ended.contains(&session_id) {
            tracing::debug!(
                session_id = %session_id,
                kind = %record.kind,
                "anomaly for an ended session; no intervention"
            );
            return Vec::new();
        }
        let ledger = self.sessions.entry(session_id).or_default();
        prune(ledger, &self.config, now);

        if ledger.applied.len() as u32 >= self.config.max_interventions {
            tracing::warn!(
                session_id = %session_id,
                kind = %record.kind,
                max = self.config.max_interventions,
                "intervention rate limit reached; anomaly recorded only"
            );
            self.record(session_id, record.kind, Some(strategy), DecisionStatus::RateLimited);
            return Vec::new();
        }
        if let Some(last) = ledger.last_by_kind.get(&record.kind) {
            if now.saturating_duration_since(*last) < self.config.cooldown {
                tracing::warn!(
                    session_id = %session_id,
                    kind = %record.kind,
                    "intervention cooling down; anomaly recorded only"
                );
                self.record(session_id, record.kind, Some(strategy), DecisionStatus::CoolingDown);
                return Vec::new();
            }
        }

        let report = InterventionReport {
            anomaly_kind: record.kind,
            strategy,
            outcome: if strategy.injects() {
                InterventionOutcome::Injected
            } else {
                InterventionOutcome::Reported
            },
            message: strategy.message(record),
            escalation_level: 0,
        };
        ledger.applied.push_back(now);
        ledger.last_by_kind.insert(record.kind, now);
        if strategy.injects() {
            ledger.follow_ups.insert(
                record.kind,
                FollowUp {
                    level: 0,
                    deadline: now + self.config.follow_up_window,
                },
            );
        }
        self.record(session_id, record.kind, Some(strategy), DecisionStatus::Applied);

        vec![if strategy.injects() {
            Action::Inject { session_id, report }
        } else {
            Action::Report { session_id, report }
        }]
    }

    /// Any phase change after an intervention counts as a response to it.
    pub(super) fn on_phase_changed(&mut self, session_id: SessionId) {
        if let Some(ledger) = self.sessions.get_mut(&session_id) {
            ledger.follow_ups.clear();
        }
    }

    pub(super) fn on_session_ended(&mut self, session_id: SessionId) {
        self.sessions.remove(&session_id);
        if self.ended.len() == ENDED_CAPACITY {
            self.ended.pop_front();
        }
        self.ended.push_back(session_id);
    }

    /// Earliest pending follow-up deadline.
    pub(super) fn next_deadline(&self) -> Option<Instant> {
        self.sessions
            .values()
            .flat_map(|ledger| ledger.follow_ups.values().map(|f| f.deadline))
            .min()
    }

    /// Escalate or give up on follow-ups whose window has passed.
    pub(super) fn on_deadline(&mut self, now: Instant) -> Vec<Action> {
        let mut expired = Vec::new();
        for (session_id, ledger) in &mut self.sessions {
            let kinds: Vec<AnomalyKind> = ledger
                .follow_ups
                .iter()
                .filter(|(_, f)| f.deadline <= now)
                .map(|(kind, _)| *kind)
                .collect();
            for kind in kinds {
                if let Some(follow_up) = ledger.follow_ups.remove(&kind) {
                    expired.push((*session_id, kind, follow_up.level));
                }
            }
        }

        let mut actions = Vec::new();
        for (session_id, kind, level) in expired {
            if level >= self.config.max_escalations {
                let message = CadenceError::InterventionExhausted { session_id, kind }.to_string();
                tracing::warn!(
                    session_id = %session_id,
                    kind = %kind,
                    "automatic interventions exhausted"
                );
                self.record(session_id, kind, None, DecisionStatus::Exhausted);
                actions.push(Action::Exhausted {
                    session_id,
                    kind,
                    message,
                });
                continue;
            }

            let ledger = self.sessions.entry(session_id).or_default();
            prune(ledger, &self.config, now);
            let strategy = InterventionStrategy::ProposeReset;
            if ledger.applied.len() as u32 >= self.config.max_interventions {
                tracing::warn!(
                    session_id = %session_id,
                    kind = %kind,
                    "escalation suppressed by rate limit"
                );
                self.record(session_id, kind, Some(strategy), DecisionStatus::RateLimited);
                continue;
            }
            ledger.applied.push_back(now);
            ledger.last_by_kind.insert(kind, now);
            ledger.follow_ups.insert(
                kind,
                FollowUp {
                    level: level + 1,
                    deadline: now + self.config.follow_up_window,
                },
            );
            self.record(session_id, kind, Some(strategy), DecisionStatus::Applied);
            actions.push(Action::Inject {
                session_id,
                report: InterventionReport {
                    anomaly_kind: kind,
                    strategy,
                    outcome: InterventionOutcome::Injected,
                    message: strategy.escalation_message(),
                    escalation_level: level + 1,
                },
            });
        }
        actions
    }

    fn record(
        &mut self,
        session_id: SessionId,
        anomaly_kind: AnomalyKind,
        strategy: Option<InterventionStrategy>,
        status: DecisionStatus,
    ) {
        if self.decisions.len() == LEDGER_CAPACITY {
            self.decisions.pop_front();
        }
        self.decisions.push_back(InterventionDecision {
            session_id,
            anomaly_kind,
            strategy,
            status,
            timestamp: Utc::now(),
        });
    }
}

fn prune(ledger: &mut SessionLedger, config: &InterventionConfig, now: Instant) {
    while ledger
        .applied
        .front()
        .is_some_and(|t| now.saturating_duration_since(*t) >= config.rate_window)
    {
        ledger.applied.pop_front();
    }
}
