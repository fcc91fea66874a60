use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use crate::session::SessionPhase;

/// Latency samples kept as the trailing baseline.
const BASELINE_CAPACITY: usize = 50;

/// Rolling measurements for one session.
#[derive(Debug)]
pub(super) struct SessionTracker {
    last_activity: Instant,
    awaiting_since: Option<Instant>,
    stall_reported: bool,
    errors: HashMap<String, VecDeque<Instant>>,
    baseline: VecDeque<u64>,
    recent: Vec<u64>,
    last_tool_call: Option<String>,
    tool_repeats: u32,
}

/// A full window of recent latencies compared against the baseline.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct LatencyWindow {
    pub(super) samples: Vec<u64>,
    pub(super) recent_mean: f64,
    pub(super) baseline_mean: f64,
    pub(super) baseline_len: usize,
}

impl SessionTracker {
    pub(super) fn new(now: Instant) -> Self {
        Self {
            last_activity: now,
            awaiting_since: None,
            stall_reported: false,
            errors: HashMap::new(),
            baseline: VecDeque::new(),
            recent: Vec::new(),
            last_tool_call: None,
            tool_repeats: 0,
        }
    }

    /// Any loop-originated event starts a new idle episode.
    pub(super) fn note_activity(&mut self, now: Instant) {
        self.last_activity = now;
        self.stall_reported = false;
    }

    pub(super) fn enter_phase(&mut self, phase: SessionPhase, now: Instant) {
        self.awaiting_since = match phase {
            SessionPhase::AwaitingToolResult => Some(now),
            _ => None,
        };
    }

    /// Idle time while awaiting tool results, unless already reported.
    pub(super) fn unreported_idle(&self, now: Instant) -> Option<Duration> {
        if self.stall_reported {
            return None;
        }
        let since = self.awaiting_since?.max(self.last_activity);
        Some(now.saturating_duration_since(since))
    }

    pub(super) fn mark_stall_reported(&mut self) {
        self.stall_reported = true;
    }

    /// Record an error and return how many with the same signature fall
    /// inside `window`.
    pub(super) fn record_error(&mut self, signature: &str, now: Instant, window: Duration) -> u32 {
        let times = self.errors.entry(signature.to_string()).or_default();
        times.push_back(now);
        while times
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) > window)
        {
            times.pop_front();
        }
        times.len() as u32
    }

    /// Forget errors with this signature once a burst has been reported.
    pub(super) fn clear_errors(&mut self, signature: &str) {
        self.errors.remove(signature);
    }

    /// Add a latency sample. Once `window` samples have accumulated they are
    /// returned with the baseline they are compared against, then folded into
    /// the baseline.
    pub(super) fn record_latency(
        &mut self,
        latency_ms: u64,
        window: usize,
    ) -> Option<LatencyWindow> {
        self.recent.push(latency_ms);
        if self.recent.len() < window.max(1) {
            return None;
        }
        let samples = std::mem::take(&mut self.recent);
        let result = LatencyWindow {
            recent_mean: mean(samples.iter().copied()),
            baseline_mean: mean(self.baseline.iter().copied()),
            baseline_len: self.baseline.len(),
            samples: samples.clone(),
        };
        for sample in samples {
            if self.baseline.len() == BASELINE_CAPACITY {
                self.baseline.pop_front();
            }
            self.baseline.push_back(sample);
        }
        Some(result)
    }

    /// Count consecutive identical calls, including this one.
    pub(super) fn record_tool_call(&mut self, name: &str, arguments: &serde_json::Value) -> u32 {
        let signature = format!("{name}:{arguments}");
        if self.last_tool_call.as_deref() == Some(signature.as_str()) {
            self.tool_repeats += 1;
        } else {
            self.last_tool_call = Some(signature);
            self.tool_repeats = 1;
        }
        self.tool_repeats
    }
}

fn mean(values: impl ExactSizeIterator<Item = u64>) -> f64 {
    let len = values.len();
    if len == 0 {
        return 0.0;
    }
    values.map(|v| v as f64).sum::<f64>() / len as f64
}
