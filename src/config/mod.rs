//! Engine configuration (layered: defaults < TOML file < environment).

use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::CadenceError;
use crate::util::retry::RetryPolicy;

const ENV_PREFIX: &str = "CADENCE_";
const CONFIG_FILE_NAME: &str = "cadence.toml";

/// Complete engine configuration. Every field has a default.
#[derive(Debug, Clone, Default, PartialEq, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[builder(default)]
    pub session: SessionConfig,
    #[builder(default)]
    pub bus: BusConfig,
    #[builder(default)]
    pub detector: DetectorConfig,
    #[builder(default)]
    pub intervention: InterventionConfig,
}

/// How identified tool calls get executed.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ToolExecutionMode {
    /// The loop runs tools against its registry.
    #[default]
    Direct,
    /// The loop publishes `toolCall.identified` and waits for `provideToolResult`.
    Delegated,
}

/// Session execution loop settings.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Consecutive turns the loop may take without external input.
    #[builder(default = 8)]
    pub max_autonomous_turns: u32,
    /// Deadline for the outbound LLM request to start streaming.
    #[builder(default = Duration::from_secs(60))]
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
    /// Longest gap allowed between two deltas.
    #[builder(default = Duration::from_secs(120))]
    #[serde(rename = "stream_idle_timeout_ms", with = "duration_ms")]
    pub stream_idle_timeout: Duration,
    #[builder(default)]
    pub retry: RetryPolicy,
    #[builder(default)]
    pub tool_mode: ToolExecutionMode,
    /// Agent used when `start` names none.
    #[builder(default = "default".to_string())]
    pub default_agent: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Event bus settings.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Mailbox size for non-control subscribers before drop-oldest applies.
    #[builder(default = 256)]
    pub subscriber_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Anomaly detector thresholds.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    #[builder(default = true)]
    pub enabled: bool,
    #[builder(default = Duration::from_secs(1))]
    #[serde(rename = "tick_interval_ms", with = "duration_ms")]
    pub tick_interval: Duration,
    /// Idle time while awaiting tool results before a stall is reported.
    #[builder(default = Duration::from_secs(30))]
    #[serde(rename = "stall_threshold_ms", with = "duration_ms")]
    pub stall_threshold: Duration,
    /// Similar errors within `error_burst_window` that constitute a burst.
    #[builder(default = 3)]
    pub error_burst_threshold: u32,
    #[builder(default = Duration::from_secs(60))]
    #[serde(rename = "error_burst_window_ms", with = "duration_ms")]
    pub error_burst_window: Duration,
    /// Recent mean latency over baseline mean that counts as degraded.
    #[builder(default = 2.0)]
    pub performance_factor: f64,
    #[builder(default = 3)]
    pub performance_recent_window: usize,
    #[builder(default = 5)]
    pub performance_min_baseline: usize,
    /// Identical consecutive tool calls that constitute a loop.
    #[builder(default = 4)]
    pub tool_loop_threshold: u32,
    /// Slope of the saturating confidence curve.
    #[builder(default = 1.0)]
    pub confidence_steepness: f64,
    /// Anomaly records retained for reporting.
    #[builder(default = 128)]
    pub ring_capacity: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Intervention orchestrator limits.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct InterventionConfig {
    #[builder(default = true)]
    pub enabled: bool,
    /// Interventions allowed per session within `rate_window`.
    #[builder(default = 10)]
    pub max_interventions: u32,
    #[builder(default = Duration::from_secs(300))]
    #[serde(rename = "rate_window_ms", with = "duration_ms")]
    pub rate_window: Duration,
    /// Minimum gap between interventions for the same anomaly kind.
    #[builder(default = Duration::from_secs(30))]
    #[serde(rename = "cooldown_ms", with = "duration_ms")]
    pub cooldown: Duration,
    /// Time an intervention has to change the session phase before escalating.
    #[builder(default = Duration::from_secs(60))]
    #[serde(rename = "follow_up_window_ms", with = "duration_ms")]
    pub follow_up_window: Duration,
    /// Escalation steps after the first strategy before giving up.
    #[builder(default = 1)]
    pub max_escalations: u32,
}

impl Default for InterventionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl EngineConfig {
    /// Load from a TOML file. Missing fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CadenceError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, CadenceError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// `<config_dir>/cadence/cadence.toml`, when a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "cadence")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Defaults, then the config file (`CADENCE_CONFIG` or [`default_path`](Self::default_path))
    /// when it exists, then `CADENCE_*` environment variables. A `.env` file is honoured.
    pub fn from_env() -> Result<Self, CadenceError> {
        let _ = dotenvy::dotenv();
        let path = std::env::var(format!("{ENV_PREFIX}CONFIG"))
            .ok()
            .map(PathBuf::from)
            .or_else(Self::default_path);
        let mut config = match path {
            Some(path) if path.exists() => Self::load(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `CADENCE_*` overrides from `lookup`. Unparseable values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        override_with(&mut self.session.max_autonomous_turns, var("MAX_AUTONOMOUS_TURNS"));
        override_millis(&mut self.session.request_timeout, var("REQUEST_TIMEOUT_MS"));
        override_millis(&mut self.session.stream_idle_timeout, var("STREAM_IDLE_TIMEOUT_MS"));
        override_with(&mut self.session.retry.max_attempts, var("RETRY_MAX_ATTEMPTS"));
        override_with(&mut self.session.tool_mode, var("TOOL_MODE"));
        if let Some(agent) = var("DEFAULT_AGENT").filter(|a| !a.trim().is_empty()) {
            self.session.default_agent = agent.trim().to_string();
        }

        override_with(&mut self.bus.subscriber_capacity, var("BUS_CAPACITY"));

        override_with(&mut self.detector.enabled, var("DETECTOR_ENABLED"));
        override_millis(&mut self.detector.tick_interval, var("DETECTOR_TICK_MS"));
        override_millis(&mut self.detector.stall_threshold, var("STALL_THRESHOLD_MS"));
        override_with(&mut self.detector.error_burst_threshold, var("ERROR_BURST_THRESHOLD"));
        override_with(&mut self.detector.performance_factor, var("PERFORMANCE_FACTOR"));

        override_with(&mut self.intervention.enabled, var("INTERVENTION_ENABLED"));
        override_with(&mut self.intervention.max_interventions, var("MAX_INTERVENTIONS"));
        override_millis(&mut self.intervention.cooldown, var("INTERVENTION_COOLDOWN_MS"));
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), CadenceError> {
        let invalid = |msg: &str| Err(CadenceError::Configuration(msg.to_string()));
        if self.session.max_autonomous_turns == 0 {
            return invalid("session.max_autonomous_turns must be at least 1");
        }
        if self.session.request_timeout.is_zero() || self.session.stream_idle_timeout.is_zero() {
            return invalid("session timeouts must be positive");
        }
        if self.session.retry.max_attempts == 0 {
            return invalid("session.retry.max_attempts must be at least 1");
        }
        if self.bus.subscriber_capacity == 0 {
            return invalid("bus.subscriber_capacity must be at least 1");
        }
        if self.detector.tick_interval.is_zero() {
            return invalid("detector.tick_interval_ms must be positive");
        }
        if !(self.detector.performance_factor > 1.0) {
            return invalid("detector.performance_factor must be greater than 1.0");
        }
        if self.detector.performance_recent_window == 0 {
            return invalid("detector.performance_recent_window must be at least 1");
        }
        if self.detector.error_burst_threshold == 0 || self.detector.tool_loop_threshold == 0 {
            return invalid("detector thresholds must be at least 1");
        }
        if !(self.detector.confidence_steepness > 0.0) {
            return invalid("detector.confidence_steepness must be positive");
        }
        Ok(())
    }
}

fn override_with<T: std::str::FromStr>(target: &mut T, value: Option<String>) {
    let Some(raw) = value else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(parsed) => *target = parsed,
        Err(_) => tracing::warn!(value = %raw, "ignoring unparseable configuration override"),
    }
}

fn override_millis(target: &mut Duration, value: Option<String>) {
    let mut millis = target.as_millis() as u64;
    override_with(&mut millis, value);
    *target = Duration::from_millis(millis);
}

/// Serde adapter storing a [`Duration`] as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
