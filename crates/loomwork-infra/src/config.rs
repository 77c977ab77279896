//! Global configuration loader for the workflow engine.
//!
//! Reads `config.toml` from the data directory and deserializes it into
//! [`EngineConfig`]. Falls back to sensible defaults when the file is
//! missing or malformed.

use std::path::Path;

use loomwork_types::config::EngineConfig;

/// Load the workflow engine's operational config from `{data_dir}/config.toml`.
///
/// Missing or malformed files silently fall back to [`EngineConfig::default`].
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using engine defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using engine defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {} as engine config: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            "poll_interval_secs = 5\nmax_pause_days = 14\n",
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.max_pause_days, 14);
        // Fields absent from the file keep their defaults.
        assert_eq!(config.rule_cache_ttl_secs, 300);
    }

    #[tokio::test]
    async fn load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "not valid toml !!!")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }
}
