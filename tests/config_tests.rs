//! Tests for layered configuration loading.

use std::io::Write;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use cadence::config::{EngineConfig, ToolExecutionMode};
use cadence::error::CadenceError;
use pretty_assertions::assert_eq;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const CONFIG_ENV_VARS: [&str; 4] = [
    "CADENCE_CONFIG",
    "CADENCE_MAX_AUTONOMOUS_TURNS",
    "CADENCE_DETECTOR_ENABLED",
    "CADENCE_DEFAULT_AGENT",
];

struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    fn capture(keys: &[&str]) -> Self {
        let saved = keys
            .iter()
            .map(|key| ((*key).to_string(), std::env::var(key).ok()))
            .collect();
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.saved {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}

fn env_lock_guard() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn partial_file_keeps_defaults_for_missing_fields() {
    let file = write_config(
        r#"
[session]
max_autonomous_turns = 4
tool_mode = "delegated"
stream_idle_timeout_ms = 15000

[session.retry]
max_attempts = 5

[detector]
stall_threshold_ms = 10000
"#,
    );

    let config = EngineConfig::load(file.path()).unwrap();

    assert_eq!(config.session.max_autonomous_turns, 4);
    assert_eq!(config.session.tool_mode, ToolExecutionMode::Delegated);
    assert_eq!(config.session.stream_idle_timeout, Duration::from_secs(15));
    assert_eq!(config.session.retry.max_attempts, 5);
    assert_eq!(config.session.retry.initial_backoff, Duration::from_millis(500));
    assert_eq!(config.detector.stall_threshold, Duration::from_secs(10));
    assert_eq!(config.detector.error_burst_threshold, 3);
    assert_eq!(config.intervention, EngineConfig::default().intervention);
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let err = EngineConfig::from_toml_str("[session\nmax_autonomous_turns = 4").unwrap_err();
    assert!(matches!(err, CadenceError::ConfigParse(_)));
}

#[test]
fn invalid_values_fail_validation() {
    let err = EngineConfig::from_toml_str("[detector]\nperformance_factor = 0.5").unwrap_err();
    assert!(matches!(err, CadenceError::Configuration(_)));
    assert!(err.to_string().contains("performance_factor"));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = EngineConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, CadenceError::Io(_)));
}

#[test]
fn config_survives_a_toml_round_trip() {
    let mut config = EngineConfig::default();
    config.session.default_agent = "planner".into();
    config.intervention.cooldown = Duration::from_secs(5);

    let raw = toml::to_string(&config).unwrap();
    assert!(raw.contains("cooldown_ms = 5000"));
    assert_eq!(EngineConfig::from_toml_str(&raw).unwrap(), config);
}

#[test]
fn from_env_layers_file_then_environment() {
    let _env_lock = env_lock_guard();
    let _env_guard = EnvGuard::capture(&CONFIG_ENV_VARS);
    for key in CONFIG_ENV_VARS {
        std::env::remove_var(key);
    }

    let file = write_config("[session]\nmax_autonomous_turns = 4\ndefault_agent = \"writer\"\n");
    std::env::set_var("CADENCE_CONFIG", file.path());
    std::env::set_var("CADENCE_MAX_AUTONOMOUS_TURNS", "2");
    std::env::set_var("CADENCE_DETECTOR_ENABLED", "false");

    let config = EngineConfig::from_env().unwrap();

    assert_eq!(config.session.max_autonomous_turns, 2);
    assert_eq!(config.session.default_agent, "writer");
    assert!(!config.detector.enabled);
}

#[test]
fn from_env_rejects_overrides_that_fail_validation() {
    let _env_lock = env_lock_guard();
    let _env_guard = EnvGuard::capture(&CONFIG_ENV_VARS);
    for key in CONFIG_ENV_VARS {
        std::env::remove_var(key);
    }

    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("CADENCE_CONFIG", dir.path().join("none.toml"));
    std::env::set_var("CADENCE_MAX_AUTONOMOUS_TURNS", "0");

    assert!(matches!(
        EngineConfig::from_env(),
        Err(CadenceError::Configuration(_))
    ));
}
