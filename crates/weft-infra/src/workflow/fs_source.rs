//! Workflow definitions stored as files in a directory.
//!
//! A definition with id `orders` lives at `orders.json`, `orders.yaml` or
//! `orders.yml`, probed in that order.

use std::path::{Path, PathBuf};

use weft_core::workflow::definition::{parse_workflow_json, parse_workflow_yaml};
use weft_core::workflow::source::{SourceError, WorkflowSource};
use weft_types::workflow::WorkflowDefinition;

const EXTENSIONS: [&str; 3] = ["json", "yaml", "yml"];

#[derive(Debug, Clone)]
pub struct FsWorkflowSource {
    dir: PathBuf,
}

impl FsWorkflowSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn find(&self, id: &str) -> Result<Option<PathBuf>, SourceError> {
        // Ids never contain path separators.
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Ok(None);
        }
        for ext in EXTENSIONS {
            let candidate = self.dir.join(format!("{id}.{ext}"));
            if tokio::fs::try_exists(&candidate).await? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}

impl WorkflowSource for FsWorkflowSource {
    async fn get_definition(&self, id: &str) -> Result<Option<WorkflowDefinition>, SourceError> {
        let Some(path) = self.find(id).await? else {
            tracing::debug!(id, dir = %self.dir.display(), "workflow definition not found");
            return Ok(None);
        };

        let content = tokio::fs::read_to_string(&path).await?;
        let parsed = if path.extension().is_some_and(|e| e == "json") {
            parse_workflow_json(&content)
        } else {
            parse_workflow_yaml(&content)
        };
        let mut definition = parsed.map_err(|source| SourceError::Malformed {
            id: id.to_string(),
            source,
        })?;
        if definition.id.is_empty() {
            definition.id = id.to_string();
        }
        tracing::debug!(id, path = %path.display(), "loaded workflow definition");
        Ok(Some(definition))
    }

    async fn list_ids(&self) -> Result<Vec<String>, SourceError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let known = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| EXTENSIONS.contains(&e));
            if !known {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn loads_json_and_yaml_definitions() {
        let dir = tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("alpha.json"),
            r#"{"id": "alpha", "nodes": {"a": {"type": "transform"}}}"#,
        )
        .await
        .unwrap();
        tokio::fs::write(
            dir.path().join("beta.yml"),
            "id: beta\nnodes:\n  first:\n    type: delay\n    params:\n      ms: 5\n",
        )
        .await
        .unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), "ignored").await.unwrap();

        let source = FsWorkflowSource::new(dir.path());
        assert_eq!(source.list_ids().await.unwrap(), vec!["alpha", "beta"]);

        let beta = source.get_definition("beta").await.unwrap().unwrap();
        assert_eq!(beta.id, "beta");
        assert!(beta.nodes.contains_key("first"));
        assert!(source.get_definition("gamma").await.unwrap().is_none());
        assert!(source.get_definition("../alpha").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_definition_is_an_error() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("broken.json"), "{ nope").await.unwrap();

        let source = FsWorkflowSource::new(dir.path());
        let err = source.get_definition("broken").await.unwrap_err();
        assert!(matches!(err, SourceError::Malformed { ref id, .. } if id == "broken"));
    }

    #[tokio::test]
    async fn missing_directory_lists_nothing() {
        let dir = tempdir().unwrap();
        let source = FsWorkflowSource::new(dir.path().join("absent"));
        assert!(source.list_ids().await.unwrap().is_empty());
    }
}
