//! Lookup of workflow definitions by id.
//!
//! `WorkflowEngine::run_by_id` resolves definitions through a
//! `WorkflowSource`; the filesystem implementation lives in `weft-infra`.

use std::collections::HashMap;
use std::future::Future;

use weft_types::workflow::WorkflowDefinition;

use super::definition::WorkflowInvalidError;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored definition exists but does not parse.
    #[error("definition '{id}' is malformed: {source}")]
    Malformed {
        id: String,
        #[source]
        source: WorkflowInvalidError,
    },

    #[error("workflow source unavailable: {0}")]
    Unavailable(String),
}

pub trait WorkflowSource: Send + Sync {
    /// Fetch a definition. `Ok(None)` means no definition has that id.
    fn get_definition(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<WorkflowDefinition>, SourceError>> + Send;

    /// Ids of every definition the source knows, sorted.
    fn list_ids(&self) -> impl Future<Output = Result<Vec<String>, SourceError>> + Send;
}

/// Definitions held in memory, keyed by `WorkflowDefinition::id`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkflowSource {
    definitions: HashMap<String, WorkflowDefinition>,
}

impl InMemoryWorkflowSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, definition: WorkflowDefinition) {
        self.definitions.insert(definition.id.clone(), definition);
    }
}

impl FromIterator<WorkflowDefinition> for InMemoryWorkflowSource {
    fn from_iter<I: IntoIterator<Item = WorkflowDefinition>>(iter: I) -> Self {
        let mut source = Self::new();
        for def in iter {
            source.insert(def);
        }
        source
    }
}

impl WorkflowSource for InMemoryWorkflowSource {
    async fn get_definition(&self, id: &str) -> Result<Option<WorkflowDefinition>, SourceError> {
        Ok(self.definitions.get(id).cloned())
    }

    async fn list_ids(&self) -> Result<Vec<String>, SourceError> {
        let mut ids: Vec<String> = self.definitions.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::definition::parse_workflow_json;

    #[tokio::test]
    async fn in_memory_lookup() {
        let def = parse_workflow_json(r#"{"id": "b", "nodes": {"a": {"type": "transform"}}}"#).unwrap();
        let other = parse_workflow_json(r#"{"id": "a", "nodes": {"a": {"type": "transform"}}}"#).unwrap();
        let source: InMemoryWorkflowSource = [def, other].into_iter().collect();

        assert_eq!(source.get_definition("b").await.unwrap().unwrap().id, "b");
        assert!(source.get_definition("zzz").await.unwrap().is_none());
        assert_eq!(source.list_ids().await.unwrap(), vec!["a", "b"]);
    }
}
