//! Runtime configuration loading from environment variables.
//!
//! All configuration values are loaded from `GG_SERVING_*` environment variables
//! with sensible defaults. Invalid values fall back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `GG_SERVING_MODEL_ROOT` | models | Model repository root |
//! | `GG_SERVING_LOAD_WAIT_TIMEOUT_MS` | 10000 | Max wait for a loading version (ms) |
//! | `GG_SERVING_SEQUENCE_IDLE_MINUTES` | 5 | Idle time before a sequence is evicted |
//! | `GG_SERVING_SEQUENCE_CLEANER_MINUTES` | 5 | Sequence cleaner interval (0 = off) |
//! | `GG_SERVING_MAX_SEQUENCES` | 500 | Max live sequences per stateful version |
//! | `GG_SERVING_RELOAD_INTERVAL_SECS` | 1 | Version discovery interval (0 = off) |
//! | `GG_SERVING_SHUTDOWN_GRACE_SECS` | 30 | Drain grace period on shutdown (secs) |
//! | `GG_SERVING_STATEFUL_MODELS` | (none) | Comma-separated stateful model names |
//! | `GG_SERVING_LOG_LEVEL` | info | Log filter directive |
//! | `GG_SERVING_LOG_FORMAT` | json | `json` or `pretty` |

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::telemetry::{LogConfig, LogFormat};

const MAX_LOAD_WAIT_MS: u64 = 10 * 60 * 1000;

/// Effective runtime configuration summary (serializable).
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub model_root: PathBuf,
    pub load_wait_timeout_ms: u64,
    pub sequence_idle_minutes: u64,
    pub sequence_cleaner_minutes: u64,
    pub max_sequences: usize,
    pub reload_interval_secs: u64,
    pub shutdown_grace_secs: u64,
    pub stateful_models: Vec<String>,
    pub log_level: String,
    pub log_format: String,
}

/// All runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub model_root: PathBuf,
    pub load_wait_timeout: Duration,
    pub sequence_idle: Duration,
    /// Zero disables the sequence cleaner.
    pub sequence_cleaner_interval: Duration,
    pub max_sequences: usize,
    /// Zero disables periodic reloads; versions are then discovered once at start.
    pub reload_interval: Duration,
    pub shutdown_grace: Duration,
    pub stateful_models: BTreeSet<String>,
    pub log: LogConfig,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            model_root: PathBuf::from("models"),
            load_wait_timeout: Duration::from_millis(10_000),
            sequence_idle: Duration::from_secs(5 * 60),
            sequence_cleaner_interval: Duration::from_secs(5 * 60),
            max_sequences: 500,
            reload_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(30),
            stateful_models: BTreeSet::new(),
            log: LogConfig::default(),
        }
    }
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_name_list(key: &str) -> BTreeSet<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load logging configuration from environment.
fn load_log_config() -> LogConfig {
    let mut log = LogConfig::default();
    if let Ok(level) = std::env::var("GG_SERVING_LOG_LEVEL") {
        if !level.trim().is_empty() {
            log.level = level.trim().to_string();
        }
    }
    if let Ok(format) = std::env::var("GG_SERVING_LOG_FORMAT") {
        match format.parse::<LogFormat>() {
            Ok(format) => log.format = format,
            Err(e) => eprintln!("ignoring GG_SERVING_LOG_FORMAT: {}", e),
        }
    }
    log
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    let defaults = EnvConfig::default();

    let model_root = std::env::var("GG_SERVING_MODEL_ROOT")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or(defaults.model_root);
    let load_wait_ms = parse_u64("GG_SERVING_LOAD_WAIT_TIMEOUT_MS", 10_000);
    let load_wait_ms = load_wait_ms.min(MAX_LOAD_WAIT_MS);
    let idle_minutes = parse_u64("GG_SERVING_SEQUENCE_IDLE_MINUTES", 5);
    let idle_minutes = idle_minutes.max(1); // floor: 1 minute
    let cleaner_minutes = parse_u64("GG_SERVING_SEQUENCE_CLEANER_MINUTES", 5);
    let max_sequences = parse_usize("GG_SERVING_MAX_SEQUENCES", 500);
    let max_sequences = max_sequences.max(1);
    let reload_secs = parse_u64("GG_SERVING_RELOAD_INTERVAL_SECS", 1);
    let grace_secs = parse_u64("GG_SERVING_SHUTDOWN_GRACE_SECS", 30);
    let grace_secs = grace_secs.max(1);

    EnvConfig {
        model_root,
        load_wait_timeout: Duration::from_millis(load_wait_ms),
        sequence_idle: Duration::from_secs(idle_minutes * 60),
        sequence_cleaner_interval: Duration::from_secs(cleaner_minutes * 60),
        max_sequences,
        reload_interval: Duration::from_secs(reload_secs),
        shutdown_grace: Duration::from_secs(grace_secs),
        stateful_models: parse_name_list("GG_SERVING_STATEFUL_MODELS"),
        log: load_log_config(),
    }
}

impl EnvConfig {
    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            model_root: self.model_root.clone(),
            load_wait_timeout_ms: self.load_wait_timeout.as_millis() as u64,
            sequence_idle_minutes: self.sequence_idle.as_secs() / 60,
            sequence_cleaner_minutes: self.sequence_cleaner_interval.as_secs() / 60,
            max_sequences: self.max_sequences,
            reload_interval_secs: self.reload_interval.as_secs(),
            shutdown_grace_secs: self.shutdown_grace.as_secs(),
            stateful_models: self.stateful_models.iter().cloned().collect(),
            log_level: self.log.level.clone(),
            log_format: self.log.format.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid cross-test pollution.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "GG_SERVING_MODEL_ROOT",
        "GG_SERVING_LOAD_WAIT_TIMEOUT_MS",
        "GG_SERVING_SEQUENCE_IDLE_MINUTES",
        "GG_SERVING_SEQUENCE_CLEANER_MINUTES",
        "GG_SERVING_MAX_SEQUENCES",
        "GG_SERVING_RELOAD_INTERVAL_SECS",
        "GG_SERVING_SHUTDOWN_GRACE_SECS",
        "GG_SERVING_STATEFUL_MODELS",
        "GG_SERVING_LOG_LEVEL",
        "GG_SERVING_LOG_FORMAT",
    ];

    fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_defaults_are_sensible() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load();
        assert_eq!(cfg.model_root, PathBuf::from("models"));
        assert_eq!(cfg.load_wait_timeout, Duration::from_millis(10_000));
        assert_eq!(cfg.sequence_idle, Duration::from_secs(300));
        assert_eq!(cfg.sequence_cleaner_interval, Duration::from_secs(300));
        assert_eq!(cfg.max_sequences, 500);
        assert_eq!(cfg.reload_interval, Duration::from_secs(1));
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(30));
        assert!(cfg.stateful_models.is_empty());
        assert_eq!(cfg.log.format, LogFormat::Json);
    }

    #[test]
    fn test_env_vars_override_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("GG_SERVING_MODEL_ROOT", "/srv/models");
        std::env::set_var("GG_SERVING_LOAD_WAIT_TIMEOUT_MS", "250");
        std::env::set_var("GG_SERVING_SEQUENCE_IDLE_MINUTES", "2");
        std::env::set_var("GG_SERVING_SEQUENCE_CLEANER_MINUTES", "0");
        std::env::set_var("GG_SERVING_STATEFUL_MODELS", " lstm, ,gru ");
        std::env::set_var("GG_SERVING_LOG_FORMAT", "pretty");
        let cfg = load();
        assert_eq!(cfg.model_root, PathBuf::from("/srv/models"));
        assert_eq!(cfg.load_wait_timeout, Duration::from_millis(250));
        assert_eq!(cfg.sequence_idle, Duration::from_secs(120));
        assert!(cfg.sequence_cleaner_interval.is_zero());
        let names: Vec<&str> = cfg.stateful_models.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["gru", "lstm"]);
        assert_eq!(cfg.log.format, LogFormat::Pretty);
        clear_env_vars();
    }

    #[test]
    fn test_invalid_env_falls_back_to_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("GG_SERVING_LOAD_WAIT_TIMEOUT_MS", "soon");
        std::env::set_var("GG_SERVING_MAX_SEQUENCES", "-3");
        std::env::set_var("GG_SERVING_LOG_FORMAT", "xml");
        let cfg = load();
        assert_eq!(cfg.load_wait_timeout, Duration::from_millis(10_000));
        assert_eq!(cfg.max_sequences, 500);
        assert_eq!(cfg.log.format, LogFormat::Json);
        clear_env_vars();
    }

    #[test]
    fn test_floors_and_clamps() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("GG_SERVING_SEQUENCE_IDLE_MINUTES", "0");
        std::env::set_var("GG_SERVING_MAX_SEQUENCES", "0");
        std::env::set_var("GG_SERVING_SHUTDOWN_GRACE_SECS", "0");
        std::env::set_var("GG_SERVING_LOAD_WAIT_TIMEOUT_MS", "999999999");
        let cfg = load();
        assert_eq!(cfg.sequence_idle, Duration::from_secs(60));
        assert_eq!(cfg.max_sequences, 1);
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(1));
        assert_eq!(cfg.load_wait_timeout, Duration::from_millis(MAX_LOAD_WAIT_MS));
        clear_env_vars();
    }

    #[test]
    fn test_effective_config_round_trips_values() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let eff = load().effective_config();
        assert_eq!(eff.load_wait_timeout_ms, 10_000);
        assert_eq!(eff.sequence_idle_minutes, 5);
        assert_eq!(eff.sequence_cleaner_minutes, 5);
        assert_eq!(eff.log_format, "json");
        let json = serde_json::to_string(&eff).unwrap();
        assert!(json.contains("\"max_sequences\":500"));
    }
}
