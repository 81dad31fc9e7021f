//! Engine configuration loader for Weft.
//!
//! Reads `config.toml` from the data directory (`~/.weft/` in production)
//! and deserializes it into [`EngineConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use weft_types::config::EngineConfig;

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Read and parse a config file, surfacing every failure.
///
/// Used when the caller named the file explicitly.
pub async fn read_engine_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    toml::from_str::<EngineConfig>(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - Missing file: [`EngineConfig::default()`].
/// - Unreadable or unparsable file: logs a warning and returns the default.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    match read_engine_config(&config_path).await {
        Ok(config) => config,
        Err(ConfigError::Read { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            EngineConfig::default()
        }
        Err(err) => {
            tracing::warn!("{err}, using defaults");
            EngineConfig::default()
        }
    }
}

/// Directory searched by `weft run --id`.
pub fn workflows_dir(config: &EngineConfig, data_dir: &Path) -> PathBuf {
    config
        .workflows_dir
        .clone()
        .unwrap_or_else(|| data_dir.join("workflows"))
}

/// JSON-lines file that receives sealed run records.
pub fn runs_log_path(config: &EngineConfig, data_dir: &Path) -> PathBuf {
    config
        .runs_log
        .clone()
        .unwrap_or_else(|| data_dir.join("runs.jsonl"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use weft_types::workflow::BackoffCurve;

    #[tokio::test]
    async fn missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn valid_toml_is_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join(CONFIG_FILE),
            r#"
concurrency_limit = 2
backoff = "fixed"
cancel_grace_ms = 250

[http]
user_agent = "test-agent"
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.concurrency_limit, Some(2));
        assert_eq!(config.backoff, BackoffCurve::Fixed);
        assert_eq!(config.cancel_grace_ms, 250);
        assert_eq!(config.http.user_agent, "test-agent");
        assert_eq!(config.http.timeout_ms, 30_000);
    }

    #[tokio::test]
    async fn invalid_toml_falls_back_but_strict_read_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "this is not { valid toml !!!").await.unwrap();

        assert_eq!(load_engine_config(tmp.path()).await, EngineConfig::default());
        assert!(matches!(
            read_engine_config(&path).await,
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn derived_paths_prefer_config_values() {
        let data_dir = Path::new("/data");
        let mut config = EngineConfig::default();
        assert_eq!(workflows_dir(&config, data_dir), PathBuf::from("/data/workflows"));
        assert_eq!(runs_log_path(&config, data_dir), PathBuf::from("/data/runs.jsonl"));

        config.workflows_dir = Some(PathBuf::from("/srv/wf"));
        config.runs_log = Some(PathBuf::from("/var/log/weft.jsonl"));
        assert_eq!(workflows_dir(&config, data_dir), PathBuf::from("/srv/wf"));
        assert_eq!(runs_log_path(&config, data_dir), PathBuf::from("/var/log/weft.jsonl"));
    }
}
