use std::collections::HashMap;

use chrono::Utc;
use tokio::time::Instant;

use super::tracker::SessionTracker;
use super::{AnomalyKind, AnomalyRecord, Evidence};
use crate::bus::{BusEvent, EventPayload};
use crate::config::DetectorConfig;
use crate::session::SessionId;

/// Saturating confidence in `[0.5, 1.0]`.
///
/// Exactly reaching `threshold` gives 0.5; the remaining half is approached
/// exponentially as `measured / threshold` grows, at rate `steepness`.
pub fn confidence(measured: f64, threshold: f64, steepness: f64) -> f64 {
    let excess = if threshold > 0.0 {
        (measured / threshold - 1.0).max(0.0)
    } else {
        measured.max(0.0)
    };
    let value = 0.5 + 0.5 * (1.0 - (-excess * steepness.max(0.0)).exp());
    if value.is_nan() {
        0.5
    } else {
        value.clamp(0.5, 1.0)
    }
}

/// Per-session classification state, independent of the runtime.
#[derive(Debug)]
pub struct Classifier {
    config: DetectorConfig,
    sessions: HashMap<SessionId, SessionTracker>,
}

impl Classifier {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
        }
    }

    pub fn tracked_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Refresh the idle clock of an already tracked session.
    ///
    /// Untracked sessions are ignored so late activity cannot resurrect a
    /// session whose end was already observed.
    pub fn note_activity(&mut self, session_id: SessionId, now: Instant) {
        if let Some(tracker) = self.sessions.get_mut(&session_id) {
            tracker.note_activity(now);
        }
    }

    /// Fold one bus event into the session's measurements.
    pub fn observe(&mut self, event: &BusEvent, now: Instant) -> Vec<AnomalyRecord> {
        let session_id = event.session_id;
        match &event.payload {
            // Monitoring output and commands are not session activity.
            EventPayload::AnomalyDetected(_)
            | EventPayload::InterventionApplied(_)
            | EventPayload::InterventionExhausted { .. }
            | EventPayload::Control(_) => return Vec::new(),
            EventPayload::SessionEnded { .. } => {
                self.sessions.remove(&session_id);
                return Vec::new();
            }
            _ => {}
        }

        let config = &self.config;
        let tracker = self
            .sessions
            .entry(session_id)
            .or_insert_with(|| SessionTracker::new(now));
        tracker.note_activity(now);

        let record = match &event.payload {
            EventPayload::PhaseChanged { to, .. } => {
                tracker.enter_phase(*to, now);
                None
            }
            EventPayload::SessionError { kind, .. } => error_burst(config, tracker, kind, now),
            EventPayload::ToolCallResult {
                name,
                is_error: true,
                ..
            } => error_burst(config, tracker, &format!("tool:{name}"), now),
            EventPayload::TurnCompleted { latency_ms, .. } => {
                performance(config, tracker, *latency_ms)
            }
            EventPayload::ToolCallIdentified {
                name, arguments, ..
            } => tool_loop(config, tracker, name, arguments),
            _ => None,
        };

        record
            .map(|(kind, confidence, evidence)| AnomalyRecord {
                session_id,
                kind,
                confidence,
                evidence,
                timestamp: Utc::now(),
            })
            .into_iter()
            .collect()
    }

    /// Time-based checks: stalls while awaiting tool results.
    pub fn tick(&mut self, now: Instant) -> Vec<AnomalyRecord> {
        let threshold = self.config.stall_threshold;
        let steepness = self.config.confidence_steepness;
        let mut records = Vec::new();
        for (session_id, tracker) in &mut self.sessions {
            let Some(idle) = tracker.unreported_idle(now) else {
                continue;
            };
            if idle <= threshold {
                continue;
            }
            tracker.mark_stall_reported();
            let idle_ms = idle.as_millis() as u64;
            let threshold_ms = threshold.as_millis() as f64;
            records.push(AnomalyRecord {
                session_id: *session_id,
                kind: AnomalyKind::Stall,
                confidence: confidence(idle_ms as f64, threshold_ms, steepness),
                evidence: Evidence {
                    idle_ms: Some(idle_ms),
                    threshold: threshold_ms,
                    ..Default::default()
                },
                timestamp: Utc::now(),
            });
        }
        records
    }
}

type Finding = (AnomalyKind, f64, Evidence);

fn error_burst(
    config: &DetectorConfig,
    tracker: &mut SessionTracker,
    signature: &str,
    now: Instant,
) -> Option<Finding> {
    let count = tracker.record_error(signature, now, config.error_burst_window);
    let threshold = config.error_burst_threshold.max(1);
    if count < threshold {
        return None;
    }
    tracker.clear_errors(signature);
    Some((
        AnomalyKind::ErrorBurst,
        confidence(
            count as f64,
            threshold as f64,
            config.confidence_steepness,
        ),
        Evidence {
            error_count: Some(count),
            error_signature: Some(signature.to_string()),
            threshold: threshold as f64,
            ..Default::default()
        },
    ))
}

fn performance(
    config: &DetectorConfig,
    tracker: &mut SessionTracker,
    latency_ms: u64,
) -> Option<Finding> {
    let window = tracker.record_latency(latency_ms, config.performance_recent_window)?;
    if window.baseline_len < config.performance_min_baseline {
        return None;
    }
    // Sub-millisecond baselines would make any latency look degraded.
    let limit = config.performance_factor * window.baseline_mean.max(1.0);
    if window.recent_mean <= limit {
        return None;
    }
    Some((
        AnomalyKind::PerformanceDegradation,
        confidence(window.recent_mean, limit, config.confidence_steepness),
        Evidence {
            samples_ms: window.samples,
            baseline_mean_ms: Some(window.baseline_mean),
            recent_mean_ms: Some(window.recent_mean),
            threshold: limit,
            ..Default::default()
        },
    ))
}

fn tool_loop(
    config: &DetectorConfig,
    tracker: &mut SessionTracker,
    name: &str,
    arguments: &serde_json::Value,
) -> Option<Finding> {
    let repeats = tracker.record_tool_call(name, arguments);
    let threshold = config.tool_loop_threshold.max(2);
    if repeats != threshold {
        return None;
    }
    Some((
        AnomalyKind::ToolLoop,
        confidence(repeats as f64, threshold as f64, config.confidence_steepness),
        Evidence {
            tool_name: Some(name.to_string()),
            repeat_count: Some(repeats),
            threshold: threshold as f64,
            ..Default::default()
        },
    ))
}
