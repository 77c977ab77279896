//! Global configuration types for the workflow engine.
//!
//! `EngineConfig` is the workflow engine's own config shape (poll cadence,
//! pause window, rule-cache TTL, retry backoff), loaded from `config.toml`.

use serde::{Deserialize, Serialize};

/// Engine-wide operational tunables for the workflow orchestrator.
///
/// Loaded from `~/.loomwork/config.toml`. All fields have defaults matching
/// the compiled-in constants used where these tunables aren't yet threaded
/// through (see DESIGN.md) -- the config file governs the background loop
/// cadences today, and is the source of truth for the rest once threaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Cron scheduler poll cadence, in seconds. Spec ceiling: 30s.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// How many days a paused execution remains resumable before `Resume`
    /// fails with `stale`.
    #[serde(default = "default_max_pause_days")]
    pub max_pause_days: i64,

    /// TTL for the process-local rule cache, in seconds.
    #[serde(default = "default_rule_cache_ttl_secs")]
    pub rule_cache_ttl_secs: u64,

    /// Base delay for step retry backoff, in milliseconds.
    #[serde(default = "default_retry_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_max_pause_days() -> i64 {
    7
}

fn default_rule_cache_ttl_secs() -> u64 {
    300
}

fn default_retry_backoff_base_ms() -> u64 {
    1_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_pause_days: default_max_pause_days(),
            rule_cache_ttl_secs: default_rule_cache_ttl_secs(),
            retry_backoff_base_ms: default_retry_backoff_base_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.poll_interval_secs, 15);
        assert_eq!(config.max_pause_days, 7);
        assert_eq!(config.rule_cache_ttl_secs, 300);
        assert_eq!(config.retry_backoff_base_ms, 1_000);
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
poll_interval_secs = 5
max_pause_days = 14
rule_cache_ttl_secs = 60
retry_backoff_base_ms = 500
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.max_pause_days, 14);
        assert_eq!(config.rule_cache_ttl_secs, 60);
        assert_eq!(config.retry_backoff_base_ms, 500);
    }

}
