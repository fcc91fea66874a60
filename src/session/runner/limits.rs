use std::time::Duration;

use crate::config::{SessionConfig, ToolExecutionMode};
use crate::util::retry::RetryPolicy;

const MIN_IDLE_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub(super) struct RunnerLimits {
    pub(super) max_autonomous_turns: u32,
    pub(super) request_timeout: Duration,
    pub(super) stream_idle_timeout: Duration,
    pub(super) retry: RetryPolicy,
    pub(super) tool_mode: ToolExecutionMode,
}

impl RunnerLimits {
    pub(super) fn from_config(config: &SessionConfig) -> Self {
        Self {
            max_autonomous_turns: config.max_autonomous_turns.max(1),
            request_timeout: config.request_timeout.max(MIN_IDLE_TIMEOUT),
            stream_idle_timeout: config.stream_idle_timeout.max(MIN_IDLE_TIMEOUT),
            retry: config.retry.clone(),
            tool_mode: config.tool_mode,
        }
    }

    /// Whether the loop may take another turn without external input.
    pub(super) fn allows_autonomous_turn(&self, autonomous_turns: u32) -> bool {
        autonomous_turns <= self.max_autonomous_turns
    }
}
