//! Shared state for CLI commands: data directory and engine configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use weft_core::workflow::registry::StepRegistry;
use weft_infra::config::{load_engine_config, read_engine_config, runs_log_path, workflows_dir};
use weft_infra::filesystem::resolve_data_dir;
use weft_infra::workflow::default_registry;
use weft_types::config::EngineConfig;

pub struct AppState {
    pub data_dir: PathBuf,
    pub config: EngineConfig,
}

impl AppState {
    /// Resolve the data directory and load configuration.
    ///
    /// An explicit `config_path` must exist and parse; the implicit
    /// `{data_dir}/config.toml` falls back to defaults.
    pub async fn init(data_dir: Option<PathBuf>, config_path: Option<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.unwrap_or_else(resolve_data_dir);
        let config = match config_path {
            Some(path) => read_engine_config(&path).await?,
            None => load_engine_config(&data_dir).await,
        };
        tracing::debug!(data_dir = %data_dir.display(), "CLI state initialized");
        Ok(Self { data_dir, config })
    }

    pub fn registry(&self) -> Result<Arc<StepRegistry>> {
        let registry = default_registry(&self.config).context("failed to build HTTP client")?;
        Ok(Arc::new(registry))
    }

    pub fn workflows_dir(&self) -> PathBuf {
        workflows_dir(&self.config, &self.data_dir)
    }

    pub fn runs_log(&self) -> PathBuf {
        runs_log_path(&self.config, &self.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn init_uses_data_dir_config() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "concurrency_limit = 3\n")
            .await
            .unwrap();

        let state = AppState::init(Some(tmp.path().to_path_buf()), None).await.unwrap();
        assert_eq!(state.config.concurrency_limit, Some(3));
        assert_eq!(state.workflows_dir(), tmp.path().join("workflows"));
        assert_eq!(state.runs_log(), tmp.path().join("runs.jsonl"));
        assert!(state.registry().unwrap().contains("http.request"));
    }

    #[tokio::test]
    async fn explicit_config_must_exist() {
        let tmp = TempDir::new().unwrap();
        let result = AppState::init(
            Some(tmp.path().to_path_buf()),
            Some(tmp.path().join("missing.toml")),
        )
        .await;
        assert!(result.is_err());
    }
}
